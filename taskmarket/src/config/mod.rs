use std::time::Duration;

pub const DEFAULT_MAX_UPLOAD_SIZE: usize = 5 * 1024 * 1024;

/// Proof image storage, there are 2 resource types for now,
/// the first saves uploaded images in the database,
/// and the second saves them as files under a root directory
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Resource {
    Db,
    FS(String),
}

/// Business settings fixed at startup and handed to the market service
#[derive(Clone, Debug)]
pub struct MarketConfig {
    /// Password expected from callers of the admin tier
    pub admin_password: String,
    /// Address agents must pay the registration fee to
    pub registration_address: String,
    /// Minimum registration payment in SOL
    pub registration_fee: f64,
    pub max_upload_size: usize,
    /// A payout not settled within this window is treated as an unknown outcome
    pub payment_timeout: Duration,
}

impl MarketConfig {
    pub fn new(
        admin_password: String,
        registration_address: String,
        registration_fee: f64,
        max_upload_size: usize,
        payment_timeout: Duration,
    ) -> Self {
        MarketConfig {
            admin_password,
            registration_address,
            registration_fee,
            max_upload_size,
            payment_timeout,
        }
    }
}

/// Chain access settings
#[derive(Clone, Debug)]
pub struct ChainConfig {
    pub rpc_url: String,
    /// Path to a keypair json file, or a base58 encoded 64 byte secret
    pub treasury_key: String,
    /// Upper bound for a payout from submission to confirmation
    pub payment_timeout: Duration,
}

/// Save configuration information related to the taskmarket daemon
#[derive(Clone, Debug)]
pub struct ServiceConfig {
    pub url: String,
    pub db_dsn: String,
    pub debug_sql: bool,

    pub log_level: String,
    pub resource: Resource,
    pub market: MarketConfig,
    pub chain: ChainConfig,
}

impl ServiceConfig {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        url: String,
        db_dsn: String,
        debug_sql: bool,
        resource_type: String,
        resource_path: String,
        log_level: String,
        market: MarketConfig,
        chain: ChainConfig,
    ) -> Self {
        let resource = if resource_type == "db" {
            Resource::Db
        } else {
            Resource::FS(resource_path)
        };

        Self {
            url,
            db_dsn,
            debug_sql,
            log_level,
            resource,
            market,
            chain,
        }
    }

    /// Largest json-rpc body the server accepts, an upload is base64 encoded inside a request
    pub fn max_request_body_size(&self) -> u32 {
        let encoded = self.market.max_upload_size / 3 * 4 + 4;
        (encoded + 64 * 1024).min(u32::MAX as usize) as u32
    }
}
