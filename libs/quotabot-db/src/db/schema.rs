use anyhow::Result;
use sqlx::SqlitePool;
use tracing::info;

/// Table definitions, one statement per entry (sqlx executes a single
/// statement per query on SQLite).
pub(super) const TABLES: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS users (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        telegram_id INTEGER NOT NULL UNIQUE,
        username TEXT,
        first_name TEXT,
        last_name TEXT,
        plan_type TEXT NOT NULL DEFAULT 'FREE',
        is_pro BOOLEAN NOT NULL DEFAULT 0,
        pro_expires_at DATETIME,
        daily_tokens INTEGER NOT NULL DEFAULT 2000,
        total_tokens INTEGER NOT NULL DEFAULT 15000,
        daily_used INTEGER NOT NULL DEFAULT 0,
        total_used INTEGER NOT NULL DEFAULT 0,
        selected_model TEXT,
        referred_by INTEGER,
        referral_count INTEGER NOT NULL DEFAULT 0,
        referral_earnings INTEGER NOT NULL DEFAULT 0,
        is_active BOOLEAN NOT NULL DEFAULT 1,
        created_at DATETIME DEFAULT CURRENT_TIMESTAMP
    )",
    "CREATE TABLE IF NOT EXISTS plans (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        name TEXT NOT NULL UNIQUE,
        display_name TEXT NOT NULL,
        daily_tokens INTEGER NOT NULL,
        total_tokens INTEGER NOT NULL,
        image_limit INTEGER NOT NULL DEFAULT 0,
        tts_limit INTEGER NOT NULL DEFAULT 0,
        stt_limit INTEGER NOT NULL DEFAULT 0,
        pro_model_access BOOLEAN NOT NULL DEFAULT 0,
        priority_processing BOOLEAN NOT NULL DEFAULT 0,
        price_monthly INTEGER NOT NULL DEFAULT 0,
        is_active BOOLEAN NOT NULL DEFAULT 1
    )",
    "CREATE TABLE IF NOT EXISTS models (
        id TEXT PRIMARY KEY,
        name TEXT NOT NULL,
        provider TEXT NOT NULL,
        category TEXT NOT NULL DEFAULT 'chat',
        max_tokens INTEGER NOT NULL DEFAULT 4096,
        model_type TEXT NOT NULL DEFAULT 'FREE',
        monthly_limit INTEGER NOT NULL DEFAULT 999999,
        is_active BOOLEAN NOT NULL DEFAULT 1
    )",
    "CREATE TABLE IF NOT EXISTS tts_usage (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        user_id INTEGER NOT NULL,
        month_year TEXT NOT NULL,
        usage_count INTEGER NOT NULL DEFAULT 0,
        UNIQUE(user_id, month_year)
    )",
    "CREATE TABLE IF NOT EXISTS stt_usage (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        user_id INTEGER NOT NULL,
        month_year TEXT NOT NULL,
        usage_count INTEGER NOT NULL DEFAULT 0,
        UNIQUE(user_id, month_year)
    )",
    "CREATE TABLE IF NOT EXISTS image_usage (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        user_id INTEGER NOT NULL,
        month_year TEXT NOT NULL,
        usage_count INTEGER NOT NULL DEFAULT 0,
        UNIQUE(user_id, month_year)
    )",
    "CREATE TABLE IF NOT EXISTS pro_model_usage (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        user_id INTEGER NOT NULL,
        model_id TEXT NOT NULL,
        month_year TEXT NOT NULL,
        usage_count INTEGER NOT NULL DEFAULT 0,
        UNIQUE(user_id, model_id, month_year)
    )",
    "CREATE TABLE IF NOT EXISTS rate_limits (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        user_id INTEGER NOT NULL UNIQUE,
        request_count INTEGER NOT NULL DEFAULT 0,
        window_start DATETIME NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS promocodes (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        code TEXT NOT NULL UNIQUE,
        type TEXT NOT NULL,
        description TEXT,
        daily_tokens INTEGER NOT NULL DEFAULT 0,
        total_tokens INTEGER NOT NULL DEFAULT 0,
        tts_limit INTEGER NOT NULL DEFAULT 0,
        stt_limit INTEGER NOT NULL DEFAULT 0,
        pro_days INTEGER NOT NULL DEFAULT 0,
        plan_name TEXT,
        max_usage INTEGER NOT NULL DEFAULT 1,
        current_usage INTEGER NOT NULL DEFAULT 0,
        is_active BOOLEAN NOT NULL DEFAULT 1,
        created_by INTEGER,
        created_at DATETIME DEFAULT CURRENT_TIMESTAMP
    )",
    "CREATE TABLE IF NOT EXISTS promocode_usage (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        promocode_id INTEGER NOT NULL,
        user_id INTEGER NOT NULL,
        used_at DATETIME DEFAULT CURRENT_TIMESTAMP,
        UNIQUE(promocode_id, user_id),
        FOREIGN KEY(promocode_id) REFERENCES promocodes(id) ON DELETE CASCADE
    )",
    "CREATE TABLE IF NOT EXISTS referrals (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        referrer_id INTEGER NOT NULL,
        referred_id INTEGER NOT NULL UNIQUE,
        reward_given BOOLEAN NOT NULL DEFAULT 0,
        created_at DATETIME DEFAULT CURRENT_TIMESTAMP
    )",
    "CREATE TABLE IF NOT EXISTS referral_links (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        user_id INTEGER NOT NULL UNIQUE,
        referral_code TEXT NOT NULL UNIQUE,
        clicks INTEGER NOT NULL DEFAULT 0,
        conversions INTEGER NOT NULL DEFAULT 0,
        created_at DATETIME DEFAULT CURRENT_TIMESTAMP
    )",
    "CREATE TABLE IF NOT EXISTS referral_rewards (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        user_id INTEGER NOT NULL,
        referral_id INTEGER NOT NULL,
        daily_tokens INTEGER NOT NULL DEFAULT 0,
        total_tokens INTEGER NOT NULL DEFAULT 0,
        created_at DATETIME DEFAULT CURRENT_TIMESTAMP,
        FOREIGN KEY(referral_id) REFERENCES referrals(id) ON DELETE CASCADE
    )",
    "CREATE TABLE IF NOT EXISTS user_stats (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        user_id INTEGER NOT NULL,
        requests INTEGER NOT NULL DEFAULT 0,
        tokens INTEGER NOT NULL DEFAULT 0,
        created_at DATETIME DEFAULT CURRENT_TIMESTAMP
    )",
    "CREATE INDEX IF NOT EXISTS idx_user_stats_user ON user_stats(user_id)",
    "CREATE INDEX IF NOT EXISTS idx_referrals_referrer ON referrals(referrer_id)",
];

pub(super) async fn seed(pool: &SqlitePool) -> Result<()> {
    let plans: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM plans")
        .fetch_one(pool)
        .await?;

    sqlx::query(
        "INSERT OR IGNORE INTO plans
            (name, display_name, daily_tokens, total_tokens, image_limit, tts_limit, stt_limit, pro_model_access, priority_processing, price_monthly)
         VALUES
            ('FREE', 'Free', 2000, 15000, 3, 1, 1, 0, 0, 0),
            ('PRO', 'Pro', 8000, 80000, 10, 3, 3, 1, 1, 12000),
            ('PREMIUM', 'Premium', 12000, 150000, 25, 10, 10, 1, 1, 25000)",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "INSERT OR IGNORE INTO models (id, name, provider, category, max_tokens, model_type) VALUES
            ('meta-llama/llama-3.1-8b-instruct', 'Llama 3.1 8B', 'openrouter', 'chat', 8192, 'FREE'),
            ('openai/gpt-4o-mini', 'GPT-4o mini', 'openrouter', 'chat', 8192, 'FREE'),
            ('google/gemini-flash-1.5', 'Gemini 1.5 Flash', 'openrouter', 'chat', 8192, 'FREE'),
            ('deepseek/deepseek-chat', 'DeepSeek V3', 'openrouter', 'chat', 8192, 'FREE'),
            ('mistralai/mistral-7b-instruct', 'Mistral 7B', 'openrouter', 'chat', 8192, 'FREE'),
            ('llama-3.1-8b-instant', 'Llama 3.1 8B Instant', 'groq', 'chat', 8192, 'FREE'),
            ('openai/gpt-4o', 'GPT-4o', 'openrouter', 'chat', 4096, 'PRO'),
            ('anthropic/claude-3.5-sonnet', 'Claude 3.5 Sonnet', 'openrouter', 'chat', 4096, 'PRO')",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "INSERT OR IGNORE INTO promocodes (code, type, description, daily_tokens, total_tokens, pro_days, max_usage) VALUES
            ('WELCOME2025', 'TOKENS', 'Welcome bonus', 1000, 5000, 0, 1000),
            ('PROWEEK', 'PRO', '7 days of PRO', 0, 0, 7, 100)",
    )
    .execute(pool)
    .await?;

    if plans == 0 {
        info!("Seeded plan catalog, model list and starter promocodes");
    }

    Ok(())
}
