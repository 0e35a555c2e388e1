use teloxide::net::Download;
use teloxide::prelude::*;
use teloxide::types::{FileId, InputFile, ParseMode};
use tracing::{error, info};

use crate::services::error::ServiceError;
use crate::state::AppState;

use super::{admin, render};

pub async fn message_handler(
    bot: Bot,
    msg: Message,
    state: AppState,
) -> Result<(), teloxide::RequestError> {
    let tg_id = msg.chat.id.0;

    let (username, first_name, last_name) = match msg.from.as_ref() {
        Some(u) => (
            u.username.as_deref(),
            Some(u.first_name.as_str()),
            u.last_name.as_deref(),
        ),
        None => (None, None, None),
    };

    // Every contact refreshes the profile fields.
    let user = match state
        .user_repo
        .ensure_user(tg_id, username, first_name, last_name)
        .await
    {
        Ok(user) => user,
        Err(e) => {
            error!("Failed to upsert user {}: {:?}", tg_id, e);
            let _ = bot
                .send_message(msg.chat.id, "⚠️ Something went wrong. Please try again.")
                .await;
            return Ok(());
        }
    };

    if let Some(voice) = msg.voice() {
        handle_voice(&bot, &msg, &state, tg_id, &voice.file.id).await;
        return Ok(());
    }

    let Some(text) = msg.text() else {
        return Ok(());
    };
    let text = text.trim();
    info!("Message from {}: {:?}", tg_id, text);

    if text == "/start" || text.starts_with("/start ") {
        if let Some(payload) = text.strip_prefix("/start ") {
            let payload = payload.trim();
            if !payload.is_empty() {
                handle_start_payload(&bot, &state, tg_id, payload).await;
            }
        }
        let _ = bot
            .send_message(msg.chat.id, render::welcome(&user))
            .parse_mode(ParseMode::Html)
            .await;
        return Ok(());
    }

    if text.starts_with('/') && state.config.is_admin(tg_id) {
        if admin::dispatch(&bot, &msg, &state, text).await {
            return Ok(());
        }
    }

    if let Some(arg) = text.strip_prefix("/model ") {
        match state.users.set_selected_model(tg_id, arg.trim()).await {
            Ok(model) => {
                let _ = bot
                    .send_message(
                        msg.chat.id,
                        format!("✅ Model set to <b>{}</b>.", render::escape_html(&model.name)),
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
        return Ok(());
    }

    if let Some(code) = text.strip_prefix("/promocode ") {
        match state.promos.redeem(code, tg_id).await {
            Ok(redeemed) => {
                let _ = bot
                    .send_message(msg.chat.id, render::redeemed(&redeemed))
                    .parse_mode(ParseMode::Html)
                    .await;
            }
            Err(ServiceError::AlreadyUsed) => {
                let _ = bot
                    .send_message(msg.chat.id, "❌ You already used this promocode.")
                    .await;
            }
            Err(err) => {
                let _ = bot
                    .send_message(msg.chat.id, render::service_error(&err))
                    .await;
            }
        }
        return Ok(());
    }

    if let Some(prompt) = text.strip_prefix("/image ") {
        let prompt = prompt.trim();
        if prompt.is_empty() {
            let _ = bot
                .send_message(msg.chat.id, "Usage: /image <prompt>")
                .await;
            return Ok(());
        }

        let _ = bot
            .send_message(msg.chat.id, "🎨 Generating your image, hold on...")
            .await;
        match state.images.generate(tg_id, prompt).await {
            Ok(bytes) => {
                let _ = bot
                    .send_photo(msg.chat.id, InputFile::memory(bytes).file_name("image.png"))
                    .await;
            }
            Err(err) => {
                let _ = bot
                    .send_message(msg.chat.id, render::service_error(&err))
                    .await;
            }
        }
        return Ok(());
    }

    if let Some(input) = text.strip_prefix("/tts ") {
        let input = input.trim();
        if input.is_empty() {
            let _ = bot.send_message(msg.chat.id, "Usage: /tts <text>").await;
            return Ok(());
        }

        match state.voice.synthesize(tg_id, input).await {
            Ok(audio) => {
                let _ = bot
                    .send_voice(msg.chat.id, InputFile::memory(audio).file_name("voice.mp3"))
                    .await;
            }
            Err(err) => {
                let _ = bot
                    .send_message(msg.chat.id, render::service_error(&err))
                    .await;
            }
        }
        return Ok(());
    }

    match text {
        "/help" => {
            let _ = bot
                .send_message(msg.chat.id, render::help(state.config.is_admin(tg_id)))
                .parse_mode(ParseMode::Html)
                .await;
        }
        "/stats" => {
            // Lazy PRO expiry before the read so a stale plan never shows.
            let _ = state.plans.is_user_pro(tg_id).await;
            match state.stats.overview(tg_id).await {
                Ok(view) => {
                    let _ = bot
                        .send_message(msg.chat.id, render::stats(&view))
                        .parse_mode(ParseMode::Html)
                        .await;
                }
                Err(err) => {
                    error!("Stats overview failed for {}: {}", tg_id, err);
                    let _ = bot
                        .send_message(msg.chat.id, render::stats_fallback())
                        .parse_mode(ParseMode::Html)
                        .await;
                }
            }
        }
        "/plans" => match state.catalog.list_plans().await {
            Ok(plans) => {
                let _ = bot
                    .send_message(msg.chat.id, render::plans(&plans))
                    .parse_mode(ParseMode::Html)
                    .await;
            }
            Err(err) => {
                let _ = bot
                    .send_message(msg.chat.id, render::service_error(&err))
                    .await;
            }
        },
        "/myplan" => match state.plans.refresh_pro_status(user).await {
            Ok((user, _)) => match state.catalog.plan_for(&user).await {
                Ok(plan) => {
                    let _ = bot
                        .send_message(msg.chat.id, render::my_plan(&user, &plan))
                        .parse_mode(ParseMode::Html)
                        .await;
                }
                Err(err) => {
                    let _ = bot
                        .send_message(msg.chat.id, render::service_error(&err))
                        .await;
                }
            },
            Err(err) => {
                let _ = bot
                    .send_message(msg.chat.id, render::service_error(&err))
                    .await;
            }
        },
        "/models" => match state.catalog.list_models().await {
            Ok(models) => {
                let _ = bot
                    .send_message(
                        msg.chat.id,
                        render::models(&models, user.selected_model.as_deref()),
                    )
                    .parse_mode(ParseMode::Html)
                    .await;
            }
            Err(err) => {
                let _ = bot
                    .send_message(msg.chat.id, render::service_error(&err))
                    .await;
            }
        },
        "/referral" => {
            let bot_username = bot
                .get_me()
                .await
                .ok()
                .and_then(|me| me.username.clone())
                .unwrap_or_else(|| "bot".to_string());

            match state.referrals.stats(tg_id).await {
                Ok(stats) => {
                    let top = state.referrals.leaderboard(3).await.unwrap_or_default();
                    let _ = bot
                        .send_message(
                            msg.chat.id,
                            render::referral(&stats, &top, &bot_username),
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
        "/model" => {
            let _ = bot.send_message(msg.chat.id, "Usage: /model <id>").await;
        }
        "/promocode" => {
            let _ = bot
                .send_message(msg.chat.id, "Usage: /promocode <code>")
                .await;
        }
        "/image" => {
            let _ = bot
                .send_message(msg.chat.id, "Usage: /image <prompt>")
                .await;
        }
        "/tts" => {
            let _ = bot.send_message(msg.chat.id, "Usage: /tts <text>").await;
        }
        _ if text.starts_with('/') => {
            let _ = bot
                .send_message(msg.chat.id, "Unknown command. See /help.")
                .await;
        }
        _ => run_chat(&bot, &msg, &state, tg_id, text).await,
    }

    Ok(())
}

async fn handle_start_payload(bot: &Bot, state: &AppState, tg_id: i64, payload: &str) {
    if !payload.starts_with("ref_") {
        return;
    }

    let referrer = match state.referrals.resolve(payload).await {
        Ok(Some(referrer)) => referrer,
        Ok(None) => return,
        Err(err) => {
            error!("Referral resolve failed: {}", err);
            return;
        }
    };

    match state.referrals.process_referral(referrer, tg_id).await {
        Ok(()) => {
            let _ = bot
                .send_message(
                    ChatId(tg_id),
                    "🎁 <b>Referral bonus!</b> Your token limits went up by +3000 daily / +10000 total.",
                )
                .parse_mode(ParseMode::Html)
                .await;
            let _ = bot
                .send_message(
                    ChatId(referrer),
                    "🎉 Someone joined with your referral link! Your limits went up by +5000 daily / +15000 total.",
                )
                .parse_mode(ParseMode::Html)
                .await;
        }
        // Returning users and self-clicks just get the normal welcome.
        Err(ServiceError::AlreadyUsed) | Err(ServiceError::SelfReferral) => {}
        Err(err) => error!("Referral processing failed for {}: {}", tg_id, err),
    }
}

async fn handle_voice(bot: &Bot, msg: &Message, state: &AppState, tg_id: i64, file_id: &FileId) {
    let file = match bot.get_file(file_id.clone()).await {
        Ok(file) => file,
        Err(e) => {
            error!("Failed to resolve voice file: {}", e);
            let _ = bot
                .send_message(msg.chat.id, "⚠️ Could not fetch your voice message.")
                .await;
            return;
        }
    };

    let mut audio: Vec<u8> = Vec::new();
    if let Err(e) = bot.download_file(&file.path, &mut audio).await {
        error!("Failed to download voice file: {}", e);
        let _ = bot
            .send_message(msg.chat.id, "⚠️ Could not download your voice message.")
            .await;
        return;
    }

    let transcript = match state.voice.transcribe(tg_id, audio).await {
        Ok(text) => text,
        Err(err) => {
            let _ = bot
                .send_message(msg.chat.id, render::service_error(&err))
                .await;
            return;
        }
    };

    let _ = bot
        .send_message(
            msg.chat.id,
            format!("🎙 <i>{}</i>", render::escape_html(&transcript)),
        )
        .parse_mode(ParseMode::Html)
        .await;

    run_chat(bot, msg, state, tg_id, &transcript).await;
}

async fn run_chat(bot: &Bot, msg: &Message, state: &AppState, tg_id: i64, prompt: &str) {
    match state.chat.generate(tg_id, prompt).await {
        Ok(reply) => {
            let _ = bot
                .send_message(
                    msg.chat.id,
                    format!(
                        "{}\n\n<i>🤖 {} · {} tokens</i>",
                        render::escape_html(&reply.text),
                        render::escape_html(&reply.model_name),
                        reply.tokens_used
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
