use quotabot_db::models::{AiModel, Plan, Promocode, User};

use crate::services::error::ServiceError;
use crate::services::promo_service::{Benefit, Redeemed};
use crate::services::quota_service::UsageCheck;
use crate::services::referral_service::ReferralStats;
use crate::services::stats_service::UserOverview;

/// Messages go out with HTML parse mode, so anything user- or
/// provider-supplied passes through here first.
pub fn escape_html(s: &str) -> String {
    s.replace('&', "&amp;").replace('<', "&lt;").replace('>', "&gt;")
}

/// User-facing rendering for service failures. Storage and provider
/// details stay in the logs.
pub fn service_error(err: &ServiceError) -> String {
    match err {
        ServiceError::NotFound("user") => "Please send /start first.".to_string(),
        ServiceError::NotFound("model") => {
            "❌ Unknown model. See /models for the list.".to_string()
        }
        ServiceError::NotFound("promocode") => {
            "❌ This promocode does not exist or is no longer active.".to_string()
        }
        ServiceError::NotFound("plan") => "❌ Unknown plan. See /plans.".to_string(),
        ServiceError::NotFound(what) => format!("❌ {} not found.", what),
        ServiceError::AlreadyUsed => "❌ Already used.".to_string(),
        ServiceError::Exhausted {
            resource: "promocode",
            ..
        } => "❌ This promocode has reached its usage cap.".to_string(),
        ServiceError::Exhausted {
            resource,
            limit,
            remaining,
            resets,
        } => format!(
            "🚫 Your {} limit is used up: {} {}, {} remaining.\n\nUpgrade with /plans for higher limits.",
            resource,
            limit,
            cadence(resets),
            remaining
        ),
        ServiceError::SelfReferral => "❌ You can't use your own referral link.".to_string(),
        ServiceError::InvalidInput(reason) => format!("❌ {}.", reason),
        ServiceError::RateLimited { reset_at } => format!(
            "⏳ Too many requests. Try again after {}.",
            reset_at.format("%H:%M:%S UTC")
        ),
        ServiceError::Storage(_) => {
            "⚠️ Something went wrong on our side. Please try again.".to_string()
        }
        ServiceError::Provider(_) => {
            "⚠️ The AI provider is unavailable right now. Please try again in a minute."
                .to_string()
        }
    }
}

fn cadence(resets: &str) -> &str {
    match resets {
        "daily" => "per day",
        "monthly" => "per month",
        "total" => "for the account lifetime",
        _ => "in total",
    }
}

pub fn welcome(user: &User) -> String {
    format!(
        "👋 <b>Hello, {}!</b>\n\n\
        I connect you to AI chat, image and voice models.\n\n\
        • Just send me a message to chat\n\
        • /image &lt;prompt&gt; draws a picture\n\
        • /tts &lt;text&gt; speaks it out loud\n\
        • Send a voice message and I'll answer it\n\n\
        Your plan: <b>{}</b>. See /help for everything else.",
        escape_html(&user.display_name()),
        escape_html(&user.plan_type)
    )
}

pub fn help(is_admin: bool) -> String {
    let mut text = "ℹ️ <b>Commands</b>\n\n\
        /stats — your usage and limits\n\
        /plans — compare the plans\n\
        /myplan — your current plan\n\
        /models — available AI models\n\
        /model &lt;id&gt; — pick a model\n\
        /promocode &lt;code&gt; — redeem a promocode\n\
        /referral — your referral link and stats\n\
        /image &lt;prompt&gt; — generate an image\n\
        /tts &lt;text&gt; — voice synthesis\n\n\
        Plain text chats with the AI. Voice messages are transcribed and answered."
        .to_string();

    if is_admin {
        text.push_str(
            "\n\n🔧 <b>Admin</b>\n\
            /addtokens &lt;id&gt; &lt;daily&gt; &lt;total&gt;\n\
            /removetokens &lt;id&gt; &lt;daily&gt; &lt;total&gt;\n\
            /grantpro &lt;id&gt; [days]\n\
            /changeplan &lt;id&gt; &lt;plan&gt;\n\
            /createpromo &lt;TYPE&gt; &lt;code|-&gt; &lt;args...&gt;\n\
            /delpromo &lt;code&gt;\n\
            /promostats\n\
            /resetlimit &lt;id&gt;\n\
            /resetdaily\n\
            /sweep",
        );
    }

    text
}

fn usage_line(label: &str, check: &UsageCheck) -> String {
    format!("{}: {} of {} left\n", label, check.remaining, check.limit)
}

pub fn stats(view: &UserOverview) -> String {
    let mut text = format!(
        "📊 <b>Your stats</b>\n\n\
        Plan: <b>{}</b>\n\n\
        💬 Tokens today: {} of {} left\n\
        💬 Tokens overall: {} of {} left\n",
        escape_html(&view.plan.display_name),
        view.user.daily_remaining(),
        view.user.daily_tokens,
        view.user.total_remaining(),
        view.user.total_tokens,
    );

    text.push_str(&usage_line("🎨 Images this month", &view.image));
    text.push_str(&usage_line("🔊 Voice synthesis this month", &view.tts));
    text.push_str(&usage_line("🎙 Transcriptions this month", &view.stt));

    text.push_str(&format!(
        "\nToday: {} requests, {} tokens\n👥 Referrals: {} ({} tokens earned)",
        view.today.requests, view.today.tokens, view.user.referral_count, view.user.referral_earnings
    ));

    text
}

pub fn stats_fallback() -> String {
    "📊 <b>Your stats</b>\n\nNo data available right now, showing zeros.\n\n\
    Today: 0 requests, 0 tokens"
        .to_string()
}

pub fn plans(plans: &[Plan]) -> String {
    let mut text = "💎 <b>Plans</b>\n".to_string();

    for plan in plans {
        let price = if plan.price_monthly == 0 {
            "free".to_string()
        } else {
            format!("{} ⭐/month", plan.price_monthly)
        };
        text.push_str(&format!(
            "\n<b>{}</b> ({})\n\
            • {} tokens/day, {} total\n\
            • {} images, {} TTS, {} STT per month\n",
            escape_html(&plan.display_name),
            price,
            plan.daily_tokens,
            plan.total_tokens,
            plan.image_limit,
            plan.tts_limit,
            plan.stt_limit,
        ));
        if plan.pro_model_access {
            text.push_str("• premium models\n");
        }
        if plan.priority_processing {
            text.push_str("• priority processing\n");
        }
    }

    text.push_str("\nPlan changes are handled by the administrators for now.");
    text
}

pub fn my_plan(user: &User, plan: &Plan) -> String {
    let mut text = format!(
        "💼 <b>Your plan: {}</b>\n\n\
        💬 Tokens: {} of {} left today, {} of {} overall\n\
        🎨 Images: {}/month · 🔊 TTS: {}/month · 🎙 STT: {}/month\n",
        escape_html(&plan.display_name),
        user.daily_remaining(),
        user.daily_tokens,
        user.total_remaining(),
        user.total_tokens,
        plan.image_limit,
        plan.tts_limit,
        plan.stt_limit,
    );

    if let Some(expires) = user.pro_expires_at {
        if user.is_pro {
            text.push_str(&format!("\n⏳ Active until {}", expires.format("%Y-%m-%d")));
        }
    }

    text
}

pub fn models(models: &[AiModel], selected: Option<&str>) -> String {
    let mut text = "🤖 <b>Models</b>\n\n".to_string();

    for model in models {
        let marker = if selected == Some(model.id.as_str()) {
            "▸ "
        } else {
            ""
        };
        let badge = if model.is_premium() { " ✦ premium" } else { "" };
        text.push_str(&format!(
            "{}<b>{}</b>{}\n<code>{}</code>\n\n",
            marker,
            escape_html(&model.name),
            badge,
            escape_html(&model.id)
        ));
    }

    text.push_str("Pick one with /model &lt;id&gt;. Premium models have a separate call budget.");
    text
}

pub fn redeemed(redeemed: &Redeemed) -> String {
    let benefit = match &redeemed.benefit {
        Benefit::Tokens { daily, total } => format!(
            "Your token limits went up by <b>+{} daily / +{} total</b>.",
            daily, total
        ),
        Benefit::TtsCredit { amount } => {
            format!("You got <b>{} extra voice synthesis</b> credits this month.", amount)
        }
        Benefit::SttCredit { amount } => {
            format!("You got <b>{} extra transcription</b> credits this month.", amount)
        }
        Benefit::Pro { days, expires_at } => format!(
            "PRO is yours for <b>{} days</b>, until {}.",
            days,
            expires_at.format("%Y-%m-%d")
        ),
        Benefit::PlanChange { plan, expires_at } => {
            let until = expires_at
                .map(|at| format!(" until {}", at.format("%Y-%m-%d")))
                .unwrap_or_default();
            format!(
                "You are now on the <b>{}</b> plan{}.",
                escape_html(&plan.display_name),
                until
            )
        }
    };

    let description = redeemed
        .description
        .as_deref()
        .map(|d| format!("\n<i>{}</i>", escape_html(d)))
        .unwrap_or_default();

    format!(
        "✅ <b>Promocode {} redeemed!</b>{}\n\n{}",
        escape_html(&redeemed.code),
        description,
        benefit
    )
}

pub fn referral(stats: &ReferralStats, top: &[User], bot_username: &str) -> String {
    let link = format!(
        "https://t.me/{}?start={}",
        bot_username, stats.link.referral_code
    );

    let mut text = format!(
        "🎁 <b>Referral program</b>\n\n\
        Invite friends: they get <b>+3000/+10000</b> tokens, you get <b>+5000/+15000</b>.\n\n\
        🔗 Your link:\n<code>{}</code>\n\n\
        👥 Invited: {} · 🖱 Clicks: {} · 💰 Earned: {} tokens",
        escape_html(&link),
        stats.referral_count,
        stats.link.clicks,
        stats.earnings,
    );

    if !top.is_empty() {
        text.push_str("\n\n🏆 <b>Top referrers</b>\n");
        for (i, user) in top.iter().enumerate() {
            text.push_str(&format!(
                "{}. {} — {} invited\n",
                i + 1,
                escape_html(&user.display_name()),
                user.referral_count
            ));
        }
    }

    text
}

pub fn promo_list(codes: &[Promocode]) -> String {
    if codes.is_empty() {
        return "No promocodes yet. Create one with /createpromo.".to_string();
    }

    let mut text = "🎟 <b>Promocodes</b>\n\n".to_string();
    for promo in codes {
        let status = if !promo.is_active {
            " (inactive)"
        } else if promo.is_exhausted() {
            " (exhausted)"
        } else {
            ""
        };
        text.push_str(&format!(
            "<code>{}</code> — {} · {}/{} used{}\n",
            escape_html(&promo.code),
            promo.promo_type,
            promo.current_usage,
            promo.max_usage,
            status
        ));
    }

    text
}
