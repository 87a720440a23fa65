use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use chrono_tz::Tz;
use secrecy::SecretString;
use serde::{Deserialize, Serialize};

use crate::duration::{deserialize_duration, serialize_duration};

fn default_timezone() -> String {
    "America/Sao_Paulo".to_string()
}

/// Visible texts and CSS hooks of the portal.
///
/// Texts are matched case-insensitively after whitespace normalization, so
/// they only need to be a distinctive fragment of the rendered label.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PortalLabels {
    pub cookie_accept: String,
    pub login: String,
    pub document_field: String,
    pub password_field: String,
    pub submit: String,
    pub region_selector: String,
    pub status_selector: String,
    pub more_options: String,
    pub invoice_options: String,
    /// Menu entry that leads to the invoice viewer.
    pub view_invoice: String,
    pub invoice_not_in_hand: String,
    /// Button that finally loads the invoice once the radio is checked.
    pub confirm_view: String,
    pub no_invoice_available: String,
    pub empty_list: String,
    pub next_page: String,

    /// Elements holding a UC code inside the account list.
    pub code_label_selector: String,
    /// Row (card) that contains a code label.
    pub row_selector: String,
    /// Explicit "open" control inside a row; the row itself is clicked when absent.
    pub open_icon_selector: String,
    /// Pagination "next" control.
    pub next_page_selector: String,
    /// Visible interactive challenge widgets.
    pub captcha_selector: String,
    /// Text shown when the portal rejects the credentials.
    pub login_error: String,
}

impl Default for PortalLabels {
    fn default() -> Self {
        Self {
            cookie_accept: "Aceitar".to_string(),
            login: "Entrar".to_string(),
            document_field: "CPF/CNPJ".to_string(),
            password_field: "Senha".to_string(),
            submit: "Entrar".to_string(),
            region_selector: "Estado".to_string(),
            status_selector: "Status".to_string(),
            more_options: "Mais opções".to_string(),
            invoice_options: "Opções de fatura".to_string(),
            view_invoice: "Visualizar fatura".to_string(),
            invoice_not_in_hand: "Não tenho a fatura em mãos".to_string(),
            confirm_view: "Visualizar".to_string(),
            no_invoice_available: "Não há faturas".to_string(),
            empty_list: "Nenhuma unidade".to_string(),
            next_page: "Próxima página".to_string(),
            code_label_selector: "[class*='codigo-uc'], [class*='numero-uc'], .uc-code".to_string(),
            row_selector: "mat-card, [role='row'], li, tr".to_string(),
            open_icon_selector: "[class*='icon-open'], [aria-label*='Abrir' i], [mattooltip*='Abrir' i]"
                .to_string(),
            next_page_selector: ".mat-paginator-navigation-next, .mat-mdc-paginator-navigation-next, [aria-label*='Próxima' i], [aria-label*='Next page' i]"
                .to_string(),
            captcha_selector: "iframe[src*='recaptcha/api2/bframe'], iframe[src*='recaptcha/enterprise/bframe'], iframe[src*='hcaptcha.com'], iframe[src*='challenges.cloudflare.com'], .h-captcha, #captcha"
                .to_string(),
            login_error: "inválid".to_string(),
        }
    }
}

/// Portal location and fixed navigation choices.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PortalConfig {
    pub base_url: String,
    /// Canonical account-list URL; failures re-navigate here.
    pub list_url: String,
    /// Region picked in the state selector.
    pub region: String,
    /// Status filter picked after the region.
    pub status_filter: String,
    /// URL fragment of the invoice service.
    pub invoice_service_pattern: String,
    /// URL fragment of the invoice service's PDF endpoint.
    pub invoice_pdf_pattern: String,
    pub headless: bool,
    pub chrome_executable: Option<PathBuf>,
    pub labels: PortalLabels,
}

impl Default for PortalConfig {
    fn default() -> Self {
        Self {
            base_url: "https://agenciavirtual.neoenergia.com".to_string(),
            list_url: "https://agenciavirtual.neoenergia.com/#/home/meus-imoveis".to_string(),
            region: "São Paulo".to_string(),
            status_filter: "Ativo".to_string(),
            invoice_service_pattern: "/faturas".to_string(),
            invoice_pdf_pattern: "pdf".to_string(),
            headless: true,
            chrome_executable: None,
            labels: PortalLabels::default(),
        }
    }
}

/// Bounds for every wait in the pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    #[serde(deserialize_with = "deserialize_duration", serialize_with = "serialize_duration")]
    pub element: Duration,
    #[serde(deserialize_with = "deserialize_duration", serialize_with = "serialize_duration")]
    pub navigation: Duration,
    #[serde(deserialize_with = "deserialize_duration", serialize_with = "serialize_duration")]
    pub login: Duration,
    #[serde(deserialize_with = "deserialize_duration", serialize_with = "serialize_duration")]
    pub popup: Duration,
    #[serde(deserialize_with = "deserialize_duration", serialize_with = "serialize_duration")]
    pub page_advance: Duration,
    /// Network settle window after clicking "view".
    #[serde(deserialize_with = "deserialize_duration", serialize_with = "serialize_duration")]
    pub settle: Duration,
    #[serde(deserialize_with = "deserialize_duration", serialize_with = "serialize_duration")]
    pub poll_interval: Duration,
    /// Upper bound for one direct HTTP fetch of an invoice URL.
    #[serde(deserialize_with = "deserialize_duration", serialize_with = "serialize_duration")]
    pub http: Duration,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            element: Duration::from_secs(15),
            navigation: Duration::from_secs(20),
            login: Duration::from_secs(30),
            popup: Duration::from_secs(5),
            page_advance: Duration::from_secs(15),
            settle: Duration::from_secs(8),
            poll_interval: Duration::from_millis(250),
            http: Duration::from_secs(60),
        }
    }
}

/// Supabase Storage bucket receiving invoices and debug dumps.
///
/// Empty `url` and `bucket` fall back to `SUPABASE_URL` and
/// `SUPABASE_STORAGE_BUCKET`, the variables the downstream script reads.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub url: String,
    pub bucket: String,
    /// Environment variable holding the service-role key.
    pub service_key_env: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            bucket: String::new(),
            service_key_env: "SUPABASE_SERVICE_ROLE_KEY".to_string(),
        }
    }
}

impl StorageConfig {
    pub fn url(&self) -> Result<String> {
        non_empty_or_env(&self.url, "SUPABASE_URL")
    }

    pub fn bucket(&self) -> Result<String> {
        non_empty_or_env(&self.bucket, "SUPABASE_STORAGE_BUCKET")
    }

    pub fn service_key(&self) -> Result<SecretString> {
        let key = std::env::var(&self.service_key_env)
            .with_context(|| format!("Missing {} in environment", self.service_key_env))?;
        Ok(SecretString::from(key))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccountSourceKind {
    /// Supabase PostgREST tables.
    Postgrest,
    /// Local TOML file.
    File,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AccountSourceConfig {
    pub source: AccountSourceKind,
    pub accounts_table: String,
    pub targets_table: String,
    /// Boolean column that marks rows in use, in both tables.
    pub active_column: String,
    /// Accounts file for `source = "file"`; relative paths resolve from the config file.
    pub path: Option<PathBuf>,
}

impl Default for AccountSourceConfig {
    fn default() -> Self {
        Self {
            source: AccountSourceKind::Postgrest,
            accounts_table: "contas_portal".to_string(),
            targets_table: "contas_portal_ucs".to_string(),
            active_column: "active".to_string(),
            path: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DebugConfig {
    /// Local directory for debug dumps; defaults to the user data dir.
    pub dir: Option<PathBuf>,
    /// Also upload dumps under `debug/` in the bucket.
    pub mirror_to_storage: bool,
}

impl Default for DebugConfig {
    fn default() -> Self {
        Self {
            dir: None,
            mirror_to_storage: true,
        }
    }
}

/// External document-processing script run after all accounts.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DownstreamConfig {
    pub enabled: bool,
    pub program: String,
    pub args: Vec<String>,
    #[serde(deserialize_with = "deserialize_duration", serialize_with = "serialize_duration")]
    pub timeout: Duration,
}

impl Default for DownstreamConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            program: "python3".to_string(),
            args: vec!["leitor_fatura_elektroneoenergia.py".to_string()],
            timeout: Duration::from_secs(30 * 60),
        }
    }
}

/// Application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// IANA timezone used for "today" and month keys.
    #[serde(default = "default_timezone")]
    pub timezone: String,
    pub portal: PortalConfig,
    pub timeouts: TimeoutConfig,
    pub storage: StorageConfig,
    pub accounts: AccountSourceConfig,
    pub debug: DebugConfig,
    pub downstream: DownstreamConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            timezone: default_timezone(),
            portal: PortalConfig::default(),
            timeouts: TimeoutConfig::default(),
            storage: StorageConfig::default(),
            accounts: AccountSourceConfig::default(),
            debug: DebugConfig::default(),
            downstream: DownstreamConfig::default(),
        }
    }
}

impl Config {
    /// Load config from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    /// Load config from a file, or return default config if file doesn't exist.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn tz(&self) -> Result<Tz> {
        self.timezone
            .parse::<Tz>()
            .map_err(|e| anyhow::anyhow!("Invalid timezone {:?}: {e}", self.timezone))
    }
}

/// Config with relative paths resolved against the config file's directory.
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub config: Config,
    pub tz: Tz,
    pub debug_dir: PathBuf,
    pub accounts_file: Option<PathBuf>,
}

impl ResolvedConfig {
    pub fn load_or_default(config_path: &Path) -> Result<Self> {
        let config = Config::load_or_default(config_path)?;
        let config_dir = match config_path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
            _ => std::env::current_dir().context("Failed to get current directory")?,
        };
        Self::resolve(config, &config_dir)
    }

    pub fn resolve(config: Config, config_dir: &Path) -> Result<Self> {
        let tz = config.tz()?;
        let debug_dir = match &config.debug.dir {
            Some(dir) => resolve_path(config_dir, dir),
            None => default_debug_dir()?,
        };
        let accounts_file = config
            .accounts
            .path
            .as_ref()
            .map(|p| resolve_path(config_dir, p));

        Ok(Self {
            config,
            tz,
            debug_dir,
            accounts_file,
        })
    }
}

fn non_empty_or_env(value: &str, var: &str) -> Result<String> {
    if !value.trim().is_empty() {
        return Ok(value.trim().to_string());
    }
    match std::env::var(var) {
        Ok(v) if !v.trim().is_empty() => Ok(v.trim().to_string()),
        _ => anyhow::bail!("{var} is not set and no value is configured"),
    }
}

fn resolve_path(base: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}

fn default_debug_dir() -> Result<PathBuf> {
    let base = dirs::data_dir().context("Could not find data directory")?;
    Ok(base.join("fatura-fetch").join("debug"))
}
