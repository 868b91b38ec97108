//! Configuration for the gradwatch pipeline
//!
//! Loaded from a TOML file, then `.env` and process environment overrides.
//! Every section has defaults so a minimal file only needs the wallet.

use anyhow::{bail, Context};
use serde::{Deserialize, Serialize};
use solana_sdk::pubkey::Pubkey;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

/// Migration program of the launch platform
pub const DEFAULT_MIGRATION_PROGRAM: &str = "39azUYFWPz3VHgKCf3VChUwbpURdCHRxjWVowf5jUJjg";

/// Meteora DAMM v2 program
pub const DEFAULT_DEX_PROGRAM: &str = "cpamdpZCGKUy5JxQXB4dcpGPiikHawvSWAd6mEn1sGG";

pub const LAMPORTS_PER_SOL: u64 = 1_000_000_000;

/// Main application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub rpc: RpcConfig,

    #[serde(default)]
    pub wallet: WalletConfig,

    #[serde(default)]
    pub listener: ListenerSection,

    #[serde(default)]
    pub registry: RegistryConfig,

    #[serde(default)]
    pub reconciler: ReconcilerConfig,

    #[serde(default)]
    pub trading: TradingConfig,

    #[serde(default)]
    pub liquidity: LiquidityConfig,

    #[serde(default)]
    pub notifier: NotifierConfig,

    #[serde(default)]
    pub monitoring: MonitoringConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcConfig {
    /// HTTP JSON-RPC endpoint
    #[serde(default = "default_rpc_url")]
    pub url: String,

    /// WebSocket endpoint for log subscriptions
    #[serde(default = "default_ws_url")]
    pub ws_url: String,

    /// Request timeout in seconds
    #[serde(default = "default_rpc_timeout")]
    pub timeout_secs: u64,

    /// Attempts for a rate-limited call before giving up
    #[serde(default = "default_rate_limit_attempts")]
    pub rate_limit_attempts: u32,

    /// Base delay for rate-limit backoff
    #[serde(default = "default_rate_limit_base_delay")]
    pub rate_limit_base_delay_ms: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WalletConfig {
    /// Path to a keypair file (JSON byte array or raw 64 bytes)
    #[serde(default)]
    pub keypair_path: Option<String>,

    /// Base58 secret key, usually supplied through WALLET_SECRET
    #[serde(default, skip_serializing)]
    pub secret: Option<String>,
}

/// Listener section, converted into [`crate::listener::ListenerConfig`]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListenerSection {
    #[serde(default = "default_migration_program")]
    pub migration_program: String,

    #[serde(default = "default_keyword_hints")]
    pub keyword_hints: Vec<String>,

    #[serde(default = "default_instruction_marker")]
    pub instruction_marker: String,

    #[serde(default = "default_dedup_ttl")]
    pub dedup_ttl_secs: u64,

    /// Bounded channel between transport and listener
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryConfig {
    /// Candidate lifetime in milliseconds
    #[serde(default = "default_candidate_ttl")]
    pub candidate_ttl_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconcilerConfig {
    #[serde(default = "default_dex_program")]
    pub dex_program: String,

    #[serde(default = "default_reconcile_interval")]
    pub interval_secs: u64,

    /// How long shutdown waits for in-flight actions
    #[serde(default = "default_drain_timeout")]
    pub drain_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradingConfig {
    /// Amount of SOL spent on each purchase
    #[serde(default = "default_buy_amount")]
    pub buy_amount_sol: f64,

    #[serde(default = "default_slippage")]
    pub slippage_bps: u16,

    /// Balance that must remain after a purchase
    #[serde(default = "default_min_reserve")]
    pub min_sol_reserve_lamports: u64,

    #[serde(default = "default_jupiter_url")]
    pub jupiter_base_url: String,

    #[serde(default)]
    pub jupiter_api_key: Option<String>,

    #[serde(default = "default_purchase_attempts")]
    pub purchase_attempts: usize,

    #[serde(default = "default_purchase_retry_delay")]
    pub purchase_retry_delay_ms: u64,

    #[serde(default = "default_confirm_checks")]
    pub confirm_checks: u32,

    /// Delay before check n is `n * confirm_step_ms`
    #[serde(default = "default_confirm_step")]
    pub confirm_step_ms: u64,

    #[serde(default = "default_settlement_poll")]
    pub settlement_poll_ms: u64,

    #[serde(default = "default_settlement_timeout")]
    pub settlement_timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LiquidityConfig {
    #[serde(default)]
    pub enabled: bool,

    /// SOL budget for the position
    #[serde(default = "default_liquidity_sol")]
    pub sol_amount: f64,

    #[serde(default = "default_slippage")]
    pub slippage_bps: u16,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NotifierConfig {
    #[serde(default)]
    pub webhook_url: Option<String>,

    #[serde(default)]
    pub telegram_bot_token: Option<String>,

    #[serde(default)]
    pub telegram_chat_id: Option<String>,

    /// Override for the Telegram API host
    #[serde(default)]
    pub telegram_api_base: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitoringConfig {
    #[serde(default = "default_true")]
    pub enable_metrics: bool,

    #[serde(default = "default_metrics_port")]
    pub metrics_port: u16,

    #[serde(default = "default_stats_interval")]
    pub stats_interval_secs: u64,
}

// Default value functions
fn default_rpc_url() -> String { "https://api.mainnet-beta.solana.com".to_string() }
fn default_ws_url() -> String { "wss://api.mainnet-beta.solana.com".to_string() }
fn default_rpc_timeout() -> u64 { 30 }
fn default_rate_limit_attempts() -> u32 { 5 }
fn default_rate_limit_base_delay() -> u64 { 500 }
fn default_migration_program() -> String { DEFAULT_MIGRATION_PROGRAM.to_string() }
fn default_keyword_hints() -> Vec<String> {
    vec![
        "Migrate".to_string(),
        "migrate".to_string(),
        "Instruction: Migrate".to_string(),
    ]
}
fn default_instruction_marker() -> String { "Program log: Instruction: Migrate".to_string() }
fn default_dedup_ttl() -> u64 { 180 }
fn default_channel_capacity() -> usize { 1024 }
fn default_candidate_ttl() -> u64 { 420_000 }
fn default_dex_program() -> String { DEFAULT_DEX_PROGRAM.to_string() }
fn default_reconcile_interval() -> u64 { 20 }
fn default_drain_timeout() -> u64 { 60 }
fn default_buy_amount() -> f64 { 0.1 }
fn default_slippage() -> u16 { 100 }
fn default_min_reserve() -> u64 { 10_000_000 }
fn default_jupiter_url() -> String { "https://lite-api.jup.ag".to_string() }
fn default_purchase_attempts() -> usize { 3 }
fn default_purchase_retry_delay() -> u64 { 2_000 }
fn default_confirm_checks() -> u32 { 6 }
fn default_confirm_step() -> u64 { 5_000 }
fn default_settlement_poll() -> u64 { 2_000 }
fn default_settlement_timeout() -> u64 { 30_000 }
fn default_liquidity_sol() -> f64 { 0.1 }
fn default_metrics_port() -> u16 { 9090 }
fn default_stats_interval() -> u64 { 60 }
fn default_true() -> bool { true }

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            url: default_rpc_url(),
            ws_url: default_ws_url(),
            timeout_secs: default_rpc_timeout(),
            rate_limit_attempts: default_rate_limit_attempts(),
            rate_limit_base_delay_ms: default_rate_limit_base_delay(),
        }
    }
}

impl Default for ListenerSection {
    fn default() -> Self {
        Self {
            migration_program: default_migration_program(),
            keyword_hints: default_keyword_hints(),
            instruction_marker: default_instruction_marker(),
            dedup_ttl_secs: default_dedup_ttl(),
            channel_capacity: default_channel_capacity(),
        }
    }
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self { candidate_ttl_ms: default_candidate_ttl() }
    }
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            dex_program: default_dex_program(),
            interval_secs: default_reconcile_interval(),
            drain_timeout_secs: default_drain_timeout(),
        }
    }
}

impl Default for TradingConfig {
    fn default() -> Self {
        Self {
            buy_amount_sol: default_buy_amount(),
            slippage_bps: default_slippage(),
            min_sol_reserve_lamports: default_min_reserve(),
            jupiter_base_url: default_jupiter_url(),
            jupiter_api_key: None,
            purchase_attempts: default_purchase_attempts(),
            purchase_retry_delay_ms: default_purchase_retry_delay(),
            confirm_checks: default_confirm_checks(),
            confirm_step_ms: default_confirm_step(),
            settlement_poll_ms: default_settlement_poll(),
            settlement_timeout_ms: default_settlement_timeout(),
        }
    }
}

impl Default for LiquidityConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            sol_amount: default_liquidity_sol(),
            slippage_bps: default_slippage(),
        }
    }
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            enable_metrics: default_true(),
            metrics_port: default_metrics_port(),
            stats_interval_secs: default_stats_interval(),
        }
    }
}

impl TradingConfig {
    pub fn buy_amount_lamports(&self) -> u64 {
        sol_to_lamports(self.buy_amount_sol)
    }
}

impl LiquidityConfig {
    pub fn sol_amount_lamports(&self) -> u64 {
        sol_to_lamports(self.sol_amount)
    }
}

impl ReconcilerConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn dex_program_id(&self) -> anyhow::Result<Pubkey> {
        parse_pubkey("reconciler.dex_program", &self.dex_program)
    }
}

impl ListenerSection {
    pub fn migration_program_id(&self) -> anyhow::Result<Pubkey> {
        parse_pubkey("listener.migration_program", &self.migration_program)
    }
}

pub fn sol_to_lamports(sol: f64) -> u64 {
    (sol * LAMPORTS_PER_SOL as f64).round() as u64
}

fn parse_pubkey(field: &str, value: &str) -> anyhow::Result<Pubkey> {
    Pubkey::from_str(value).with_context(|| format!("{} is not a valid pubkey: {}", field, value))
}

impl Config {
    /// Load configuration from TOML file
    pub fn from_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        let config: Config = toml::from_str(&content)
            .with_context(|| format!("failed to parse config file {}", path.display()))?;
        Ok(config)
    }

    /// Load configuration, then apply `.env` and environment overrides
    pub fn from_file_with_env(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();
        let mut config = Self::from_file(path)?;
        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Apply overrides from an environment lookup
    pub fn apply_env<F>(&mut self, lookup: F) -> anyhow::Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("RPC_URL") {
            self.rpc.url = v;
        }
        if let Some(v) = lookup("WS_URL") {
            self.rpc.ws_url = v;
        }
        if let Some(v) = lookup("WALLET_SECRET") {
            self.wallet.secret = Some(v);
        }
        if let Some(v) = lookup("WALLET_KEYPAIR_PATH") {
            self.wallet.keypair_path = Some(v);
        }
        if let Some(v) = lookup("BUY_AMOUNT_SOL") {
            self.trading.buy_amount_sol = v
                .parse()
                .with_context(|| format!("BUY_AMOUNT_SOL is not a number: {}", v))?;
        }
        if let Some(v) = lookup("LIQUIDITY_ENABLED") {
            self.liquidity.enabled = parse_bool(&v)
                .with_context(|| format!("LIQUIDITY_ENABLED is not a boolean: {}", v))?;
        }
        if let Some(v) = lookup("MIGRATION_PROGRAM_ID") {
            self.listener.migration_program = v;
        }
        if let Some(v) = lookup("DEX_PROGRAM_ID") {
            self.reconciler.dex_program = v;
        }
        if let Some(v) = lookup("JUPITER_API_KEY") {
            self.trading.jupiter_api_key = Some(v);
        }
        if let Some(v) = lookup("WEBHOOK_URL") {
            self.notifier.webhook_url = Some(v);
        }
        if let Some(v) = lookup("TELEGRAM_BOT_TOKEN") {
            self.notifier.telegram_bot_token = Some(v);
        }
        if let Some(v) = lookup("TELEGRAM_CHAT_ID") {
            self.notifier.telegram_chat_id = Some(v);
        }
        Ok(())
    }

    /// Validate configuration values
    pub fn validate(&self) -> anyhow::Result<()> {
        self.listener.migration_program_id()?;
        self.reconciler.dex_program_id()?;

        if !(self.trading.buy_amount_sol > 0.0) {
            bail!("trading.buy_amount_sol must be positive");
        }
        if self.trading.slippage_bps > 10_000 || self.liquidity.slippage_bps > 10_000 {
            bail!("slippage_bps cannot exceed 10000");
        }
        if self.trading.purchase_attempts == 0 {
            bail!("trading.purchase_attempts must be at least 1");
        }
        if self.trading.settlement_poll_ms == 0 {
            bail!("trading.settlement_poll_ms must be greater than 0");
        }
        if self.liquidity.enabled && !(self.liquidity.sol_amount > 0.0) {
            bail!("liquidity.sol_amount must be positive when liquidity is enabled");
        }
        if self.registry.candidate_ttl_ms == 0 {
            bail!("registry.candidate_ttl_ms must be greater than 0");
        }
        if self.reconciler.interval_secs == 0 {
            bail!("reconciler.interval_secs must be greater than 0");
        }
        if self.listener.keyword_hints.is_empty() {
            bail!("listener.keyword_hints cannot be empty");
        }
        if self.listener.instruction_marker.is_empty() {
            bail!("listener.instruction_marker cannot be empty");
        }
        if self.listener.dedup_ttl_secs == 0 {
            bail!("listener.dedup_ttl_secs must be greater than 0");
        }
        if self.listener.channel_capacity == 0 {
            bail!("listener.channel_capacity must be greater than 0");
        }
        if self.rpc.rate_limit_attempts == 0 {
            bail!("rpc.rate_limit_attempts must be at least 1");
        }
        if self.notifier.telegram_bot_token.is_some() != self.notifier.telegram_chat_id.is_some() {
            bail!("telegram_bot_token and telegram_chat_id must be set together");
        }
        if self.wallet.keypair_path.is_none() && self.wallet.secret.is_none() {
            bail!("wallet requires keypair_path or WALLET_SECRET");
        }
        Ok(())
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
