use teloxide::prelude::*;
use teloxide::types::ParseMode;

use crate::services::plan_service::DEFAULT_PRO_DAYS;
use crate::services::promo_service::NewPromocode;
use crate::state::AppState;

use super::render;

/// Routes admin commands. Returns false when the text is not one of them,
/// the caller then falls through to the user commands. The caller has
/// already verified the sender is an admin.
pub async fn dispatch(bot: &Bot, msg: &Message, state: &AppState, text: &str) -> bool {
    let mut parts = text.split_whitespace();
    let Some(cmd) = parts.next() else {
        return false;
    };
    let args: Vec<&str> = parts.collect();

    match cmd {
        "/addtokens" => add_tokens(bot, msg, state, &args).await,
        "/removetokens" => remove_tokens(bot, msg, state, &args).await,
        "/grantpro" => grant_pro(bot, msg, state, &args).await,
        "/changeplan" => change_plan(bot, msg, state, &args).await,
        "/createpromo" => create_promo(bot, msg, state, &args).await,
        "/delpromo" => delete_promo(bot, msg, state, &args).await,
        "/promostats" => promo_stats(bot, msg, state).await,
        "/resetlimit" => reset_limit(bot, msg, state, &args).await,
        "/resetdaily" => reset_daily(bot, msg, state).await,
        "/sweep" => sweep(bot, msg, state).await,
        _ => return false,
    }

    true
}

fn parse_i64(args: &[&str], idx: usize) -> Option<i64> {
    args.get(idx).and_then(|raw| raw.parse().ok())
}

async fn add_tokens(bot: &Bot, msg: &Message, state: &AppState, args: &[&str]) {
    let (Some(target), Some(daily), Some(total)) =
        (parse_i64(args, 0), parse_i64(args, 1), parse_i64(args, 2))
    else {
        let _ = bot
            .send_message(msg.chat.id, "Usage: /addtokens <telegram_id> <daily> <total>")
            .await;
        return;
    };

    match state.users.add_tokens(target, daily, total).await {
        Ok(user) => {
            let _ = bot
                .send_message(
                    msg.chat.id,
                    format!(
                        "✅ Ceilings for {} are now {} daily / {} total.",
                        target, user.daily_tokens, user.total_tokens
                    ),
                )
                .await;
        }
        Err(err) => {
            let _ = bot
                .send_message(msg.chat.id, render::service_error(&err))
                .await;
        }
    }
}

async fn remove_tokens(bot: &Bot, msg: &Message, state: &AppState, args: &[&str]) {
    let (Some(target), Some(daily), Some(total)) =
        (parse_i64(args, 0), parse_i64(args, 1), parse_i64(args, 2))
    else {
        let _ = bot
            .send_message(
                msg.chat.id,
                "Usage: /removetokens <telegram_id> <daily> <total>",
            )
            .await;
        return;
    };

    match state.users.remove_tokens(target, daily, total).await {
        Ok(user) => {
            let _ = bot
                .send_message(
                    msg.chat.id,
                    format!(
                        "✅ Ceilings for {} are now {} daily / {} total.",
                        target, user.daily_tokens, user.total_tokens
                    ),
                )
                .await;
        }
        Err(err) => {
            let _ = bot
                .send_message(msg.chat.id, render::service_error(&err))
                .await;
        }
    }
}

async fn grant_pro(bot: &Bot, msg: &Message, state: &AppState, args: &[&str]) {
    let Some(target) = parse_i64(args, 0) else {
        let _ = bot
            .send_message(msg.chat.id, "Usage: /grantpro <telegram_id> [days]")
            .await;
        return;
    };
    let days = parse_i64(args, 1).unwrap_or(DEFAULT_PRO_DAYS);
    if days <= 0 {
        let _ = bot
            .send_message(msg.chat.id, "Days must be a positive number.")
            .await;
        return;
    }

    match state.plans.grant_pro(target, days).await {
        Ok(expires_at) => {
            let _ = bot
                .send_message(
                    msg.chat.id,
                    format!(
                        "✅ PRO granted to {} until {}.",
                        target,
                        expires_at.format("%Y-%m-%d %H:%M UTC")
                    ),
                )
                .await;
        }
        Err(err) => {
            let _ = bot
                .send_message(msg.chat.id, render::service_error(&err))
                .await;
        }
    }
}

async fn change_plan(bot: &Bot, msg: &Message, state: &AppState, args: &[&str]) {
    let (Some(target), Some(plan_name)) = (parse_i64(args, 0), args.get(1)) else {
        let _ = bot
            .send_message(msg.chat.id, "Usage: /changeplan <telegram_id> <plan>")
            .await;
        return;
    };

    match state.plans.change_plan(target, plan_name).await {
        Ok(plan) => {
            let _ = bot
                .send_message(
                    msg.chat.id,
                    format!("✅ User {} moved to the {} plan.", target, plan.display_name),
                )
                .await;
        }
        Err(err) => {
            let _ = bot
                .send_message(msg.chat.id, render::service_error(&err))
                .await;
        }
    }
}

const CREATE_PROMO_USAGE: &str = "Usage:\n\
    /createpromo TOKENS <code|-> <daily> <total> [max_usage]\n\
    /createpromo TTS <code|-> <amount> [max_usage]\n\
    /createpromo STT <code|-> <amount> [max_usage]\n\
    /createpromo PRO <code|-> <days> [max_usage]\n\
    /createpromo PREMIUM <code|-> <plan> [max_usage]\n\
    Use - as the code to have one generated.";

async fn create_promo(bot: &Bot, msg: &Message, state: &AppState, args: &[&str]) {
    let Some(kind) = args.first() else {
        let _ = bot.send_message(msg.chat.id, CREATE_PROMO_USAGE).await;
        return;
    };
    let kind = kind.to_uppercase();

    let code = match args.get(1) {
        None | Some(&"-") => None,
        Some(code) => Some(code.to_string()),
    };

    let mut req = NewPromocode {
        code,
        promo_type: kind.clone(),
        created_by: Some(msg.chat.id.0),
        max_usage: 1,
        ..Default::default()
    };

    match kind.as_str() {
        "TOKENS" => {
            let (Some(daily), Some(total)) = (parse_i64(args, 2), parse_i64(args, 3)) else {
                let _ = bot.send_message(msg.chat.id, CREATE_PROMO_USAGE).await;
                return;
            };
            req.daily_tokens = daily;
            req.total_tokens = total;
            req.max_usage = parse_i64(args, 4).unwrap_or(1);
        }
        "TTS" | "STT" => {
            let Some(amount) = parse_i64(args, 2) else {
                let _ = bot.send_message(msg.chat.id, CREATE_PROMO_USAGE).await;
                return;
            };
            if kind == "TTS" {
                req.tts_limit = amount;
            } else {
                req.stt_limit = amount;
            }
            req.max_usage = parse_i64(args, 3).unwrap_or(1);
        }
        "PRO" => {
            let Some(days) = parse_i64(args, 2) else {
                let _ = bot.send_message(msg.chat.id, CREATE_PROMO_USAGE).await;
                return;
            };
            req.pro_days = days;
            req.max_usage = parse_i64(args, 3).unwrap_or(1);
        }
        "PREMIUM" => {
            let Some(plan) = args.get(2) else {
                let _ = bot.send_message(msg.chat.id, CREATE_PROMO_USAGE).await;
                return;
            };
            req.plan_name = Some(plan.to_string());
            req.max_usage = parse_i64(args, 3).unwrap_or(1);
        }
        _ => {
            let _ = bot
                .send_message(msg.chat.id, "Type must be TOKENS, TTS, STT, PRO or PREMIUM.")
                .await;
            return;
        }
    }

    match state.promos.create(req).await {
        Ok(promo) => {
            let _ = bot
                .send_message(
                    msg.chat.id,
                    format!(
                        "✅ Promocode <code>{}</code> created ({}, {} uses).",
                        render::escape_html(&promo.code),
                        promo.promo_type,
                        promo.max_usage
                    ),
                )
                .parse_mode(ParseMode::Html)
                .await;
        }
        Err(err) => {
            let _ = bot
                .send_message(msg.chat.id, render::service_error(&err))
                .await;
        }
    }
}

async fn delete_promo(bot: &Bot, msg: &Message, state: &AppState, args: &[&str]) {
    let Some(code) = args.first() else {
        let _ = bot
            .send_message(msg.chat.id, "Usage: /delpromo <code>")
            .await;
        return;
    };

    match state.promos.delete(code).await {
        Ok(()) => {
            let _ = bot.send_message(msg.chat.id, "🗑 Promocode deleted.").await;
        }
        Err(err) => {
            let _ = bot
                .send_message(msg.chat.id, render::service_error(&err))
                .await;
        }
    }
}

async fn promo_stats(bot: &Bot, msg: &Message, state: &AppState) {
    match state.promos.list().await {
        Ok(codes) => {
            let _ = bot
                .send_message(msg.chat.id, render::promo_list(&codes))
                .parse_mode(ParseMode::Html)
                .await;
        }
        Err(err) => {
            let _ = bot
                .send_message(msg.chat.id, render::service_error(&err))
                .await;
        }
    }
}

async fn reset_limit(bot: &Bot, msg: &Message, state: &AppState, args: &[&str]) {
    let Some(target) = parse_i64(args, 0) else {
        let _ = bot
            .send_message(msg.chat.id, "Usage: /resetlimit <telegram_id>")
            .await;
        return;
    };

    match state.rate_limits.reset(target).await {
        Ok(true) => {
            let _ = bot
                .send_message(msg.chat.id, format!("♻️ Rate limit cleared for {}.", target))
                .await;
        }
        Ok(false) => {
            let _ = bot
                .send_message(msg.chat.id, format!("{} had no rate limit window.", target))
                .await;
        }
        Err(err) => {
            let _ = bot
                .send_message(msg.chat.id, render::service_error(&err))
                .await;
        }
    }
}

async fn reset_daily(bot: &Bot, msg: &Message, state: &AppState) {
    match state.users.reset_daily_usage_all().await {
        Ok(count) => {
            let _ = bot
                .send_message(msg.chat.id, format!("♻️ Daily usage reset for {} users.", count))
                .await;
        }
        Err(err) => {
            let _ = bot
                .send_message(msg.chat.id, render::service_error(&err))
                .await;
        }
    }
}

async fn sweep(bot: &Bot, msg: &Message, state: &AppState) {
    match state.quota.sweep_stale_buckets().await {
        Ok(removed) => {
            let _ = bot
                .send_message(msg.chat.id, format!("🧹 Removed {} stale usage rows.", removed))
                .await;
        }
        Err(err) => {
            let _ = bot
                .send_message(msg.chat.id, render::service_error(&err))
                .await;
        }
    }
}
