use crate::models::MAX_TOKEN_DECIMALS;
use crate::services::{
    verifier::{
        DEFAULT_ENTRY_FEE, DEFAULT_MIN_CONFIRMATIONS, DEFAULT_TOKEN_CONTRACT,
        DEFAULT_TOKEN_DECIMALS, DEFAULT_TREASURY,
    },
    BatchConfig, EthereumLedgerClient, JsonFileLedger, PaymentLedger, PaymentVerifier,
    RecipientPolicy, RedisLedger, VerifierConfig,
};
use anyhow::{bail, Context, Result};
use ethers::types::{Address, U256};
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Environment {
    Development,
    Testnet,
    Production,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LedgerBackend {
    File(PathBuf),
    Redis(String),
}

#[derive(Debug, Clone)]
pub struct Config {
    pub environment: Environment,
    pub host: String,
    pub port: u16,

    // Ledger node
    pub rpc_url: String,
    pub rpc_timeout: Duration,

    // Payment policy
    pub token_contract: Address,
    pub token_decimals: u32,
    pub token_symbol: String,
    pub treasury_address: Address,
    pub allow_unchecked_recipient: bool,
    pub entry_fee: U256,
    pub min_confirmations: u64,

    // Used-payment ledger
    pub ledger_backend: LedgerBackend,

    // Batch verification
    pub pending_dir: PathBuf,
    pub batch_concurrency: usize,
    pub batch_max_attempts: u32,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let environment = Self::parse_environment()?;

        let ledger_backend = match env_or("LEDGER_BACKEND", "file").to_lowercase().as_str() {
            "file" => LedgerBackend::File(PathBuf::from(env_or(
                "USED_PAYMENTS_FILE",
                "registry/used_payments.json",
            ))),
            "redis" => LedgerBackend::Redis(env_or("REDIS_URL", "redis://localhost:6379")),
            other => bail!("Unknown LEDGER_BACKEND: {}", other),
        };

        let config = Self {
            environment,
            host: env_or("HOST", "0.0.0.0"),
            port: env_or("PORT", "8080").parse().context("Invalid PORT")?,

            rpc_url: env_or("RPC_URL", "https://mainnet.base.org"),
            rpc_timeout: Duration::from_secs(
                env_or("RPC_TIMEOUT_SECS", "30")
                    .parse()
                    .context("Invalid RPC_TIMEOUT_SECS")?,
            ),

            token_contract: Self::parse_address("TOKEN_CONTRACT", DEFAULT_TOKEN_CONTRACT)?,
            token_decimals: env_or("TOKEN_DECIMALS", &DEFAULT_TOKEN_DECIMALS.to_string())
                .parse()
                .context("Invalid TOKEN_DECIMALS")?,
            token_symbol: env_or("TOKEN_SYMBOL", "USDC"),
            treasury_address: Self::parse_address("TREASURY_ADDRESS", DEFAULT_TREASURY)?,
            allow_unchecked_recipient: env_or("ALLOW_UNCHECKED_RECIPIENT", "false")
                .parse()
                .context("Invalid ALLOW_UNCHECKED_RECIPIENT")?,
            entry_fee: U256::from_dec_str(&env_or("ENTRY_FEE", &DEFAULT_ENTRY_FEE.to_string()))
                .context("Invalid ENTRY_FEE")?,
            min_confirmations: env_or(
                "MIN_CONFIRMATIONS",
                &DEFAULT_MIN_CONFIRMATIONS.to_string(),
            )
            .parse()
            .context("Invalid MIN_CONFIRMATIONS")?,

            ledger_backend,

            pending_dir: PathBuf::from(env_or("PENDING_DIR", "registry/pending")),
            batch_concurrency: env_or("BATCH_CONCURRENCY", "4")
                .parse()
                .context("Invalid BATCH_CONCURRENCY")?,
            batch_max_attempts: env_or("BATCH_MAX_ATTEMPTS", "3")
                .parse()
                .context("Invalid BATCH_MAX_ATTEMPTS")?,
        };

        config.validate()?;
        Ok(config)
    }

    fn parse_environment() -> Result<Environment> {
        let env = env_or("ENVIRONMENT", "development");

        match env.to_lowercase().as_str() {
            "development" | "dev" => Ok(Environment::Development),
            "testnet" | "test" => Ok(Environment::Testnet),
            "production" | "prod" => Ok(Environment::Production),
            _ => bail!("Unknown environment: {}", env),
        }
    }

    fn parse_address(var: &str, default: Address) -> Result<Address> {
        match std::env::var(var) {
            Ok(raw) => Address::from_str(raw.trim())
                .with_context(|| format!("Invalid address for {}", var)),
            Err(_) => Ok(default),
        }
    }

    /// Replace the treasury, as the CLI `--treasury` flag does. The new
    /// address goes through the same validation as the configured one.
    pub fn override_treasury(&mut self, raw: &str) -> Result<()> {
        self.treasury_address = Address::from_str(raw.trim())
            .with_context(|| format!("Invalid treasury address: {}", raw))?;
        self.validate()
    }

    pub fn validate(&self) -> Result<()> {
        if !self.rpc_url.starts_with("http") {
            bail!("RPC_URL must be HTTP(S) URL");
        }
        if self.rpc_timeout.is_zero() {
            bail!("RPC_TIMEOUT_SECS must be positive");
        }
        if self.token_contract.is_zero() {
            bail!("TOKEN_CONTRACT must not be the zero address");
        }
        if self.token_decimals > MAX_TOKEN_DECIMALS {
            bail!("TOKEN_DECIMALS must be at most {}", MAX_TOKEN_DECIMALS);
        }
        if self.entry_fee.is_zero() {
            bail!("ENTRY_FEE must be positive");
        }
        if self.treasury_address.is_zero() && self.environment == Environment::Production {
            bail!(
                "TREASURY_ADDRESS must be set in production; recipient checks cannot be disabled"
            );
        }

        self.recipient_policy()?;

        tracing::info!(
            "Configuration validated for {:?} environment",
            self.environment
        );

        Ok(())
    }

    pub fn recipient_policy(&self) -> Result<RecipientPolicy> {
        Ok(RecipientPolicy::from_configured(
            self.treasury_address,
            self.allow_unchecked_recipient,
        )?)
    }

    pub fn verifier_config(&self) -> Result<VerifierConfig> {
        Ok(VerifierConfig {
            token_contract: self.token_contract,
            token_decimals: self.token_decimals,
            token_symbol: self.token_symbol.clone(),
            recipient: self.recipient_policy()?,
            min_entry_fee: self.entry_fee,
            min_confirmations: self.min_confirmations,
        })
    }

    pub async fn open_ledger(&self) -> Result<Arc<dyn PaymentLedger>> {
        match &self.ledger_backend {
            LedgerBackend::File(path) => {
                let ledger = JsonFileLedger::new(path);
                let records = ledger
                    .load_records()
                    .await
                    .context("Failed to load used payments")?;
                tracing::info!(
                    "Loaded {} used payments from {}",
                    records.len(),
                    path.display()
                );
                Ok(Arc::new(ledger))
            }
            LedgerBackend::Redis(url) => Ok(Arc::new(
                RedisLedger::connect(url)
                    .await
                    .context("Failed to connect to redis ledger")?,
            )),
        }
    }

    pub async fn build_verifier(&self) -> Result<PaymentVerifier> {
        let chain = EthereumLedgerClient::new(&self.rpc_url, self.rpc_timeout)?;
        let ledger = self.open_ledger().await?;
        Ok(PaymentVerifier::new(
            Arc::new(chain),
            ledger,
            self.verifier_config()?,
        ))
    }

    pub fn batch_config(&self, record: bool) -> BatchConfig {
        BatchConfig {
            concurrency: self.batch_concurrency,
            max_attempts: self.batch_max_attempts.max(1),
            record,
            ..BatchConfig::default()
        }
    }
}

fn env_or(var: &str, default: &str) -> String {
    std::env::var(var).unwrap_or_else(|_| default.to_string())
}
