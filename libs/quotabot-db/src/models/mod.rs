pub mod ai_model;
pub mod plan;
pub mod promo;
pub mod referral;
pub mod user;

pub use ai_model::AiModel;
pub use plan::Plan;
pub use promo::Promocode;
pub use referral::{Referral, ReferralLink};
pub use user::User;
