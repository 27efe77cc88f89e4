use brokercred::{
    index_accounts, AccountResolutionResult, AccountResolver, ArmTenantLister, AuthError,
    AzureCliExchange, BrokerCacheResolver, CloudEnvironment, ResolutionLogWriter,
    ResolverConfig, SecretFileResolver, TenantLister, TokenCache, TokenExchange,
};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tracing_subscriber::EnvFilter;

const LOG_FILTER_ENV: &str = "BROKERCRED_LOG";
const RESOLVE_USAGE: &str =
    "usage: brokercred resolve [--environment <name>] [--source broker|secret-file] [--json]";

#[derive(Debug, Error)]
#[error("{message}")]
struct CliError {
    message: String,
    exit_code: i32,
}

impl CliError {
    fn new(message: impl Into<String>, exit_code: i32) -> Self {
        Self {
            message: message.into(),
            exit_code,
        }
    }
}

impl From<AuthError> for CliError {
    fn from(err: AuthError) -> Self {
        Self::new(err.to_string(), 1)
    }
}

type CliResult<T> = Result<T, CliError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Source {
    Broker,
    SecretFile,
}

#[derive(Debug, PartialEq, Eq)]
enum CliCommand {
    Help,
    Resolve {
        environment: Option<CloudEnvironment>,
        source: Source,
        json: bool,
    },
    Accounts,
    Environments,
}

impl CliCommand {
    fn parse(args: &[String]) -> CliResult<Self> {
        let Some(first) = args.first() else {
            return Self::parse_resolve(&[]);
        };

        match first.as_str() {
            "-h" | "--help" | "help" => Ok(Self::Help),
            "resolve" => Self::parse_resolve(&args[1..]),
            flag if flag.starts_with("--") => Self::parse_resolve(args),
            "accounts" => {
                if args.len() != 1 {
                    return Err(CliError::new("usage: brokercred accounts", 2));
                }
                Ok(Self::Accounts)
            }
            "environments" | "envs" => {
                if args.len() != 1 {
                    return Err(CliError::new("usage: brokercred environments", 2));
                }
                Ok(Self::Environments)
            }
            _ => Err(CliError::new(format!("unknown command: {}", first), 2)),
        }
    }

    fn parse_resolve(args: &[String]) -> CliResult<Self> {
        let mut environment = None;
        let mut source = Source::Broker;
        let mut json = false;
        let mut i = 0;
        while i < args.len() {
            match args[i].as_str() {
                "--json" => json = true,
                "--environment" | "--env" => {
                    i += 1;
                    let name = args.get(i).ok_or_else(|| CliError::new(RESOLVE_USAGE, 2))?;
                    let parsed = name
                        .parse::<CloudEnvironment>()
                        .map_err(|err| CliError::new(err.to_string(), 2))?;
                    environment = Some(parsed);
                }
                "--source" => {
                    i += 1;
                    source = match args.get(i).map(String::as_str) {
                        Some("broker") => Source::Broker,
                        Some("secret-file") => Source::SecretFile,
                        _ => return Err(CliError::new(RESOLVE_USAGE, 2)),
                    };
                }
                _ => return Err(CliError::new(RESOLVE_USAGE, 2)),
            }
            i += 1;
        }
        Ok(Self::Resolve {
            environment,
            source,
            json,
        })
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ResolutionReport {
    method: String,
    outcome: String,
    authenticated: bool,
    environment: Option<String>,
    username: Option<String>,
    home_tenant_id: Option<String>,
    tenant_ids: Vec<String>,
    subscription_ids: Vec<String>,
    error: Option<String>,
    tenant_error: Option<String>,
}

impl From<&AccountResolutionResult> for ResolutionReport {
    fn from(result: &AccountResolutionResult) -> Self {
        Self {
            method: result.method.as_str().to_string(),
            outcome: result.outcome.as_str().to_string(),
            authenticated: result.authenticated,
            environment: result.environment.map(|environment| environment.to_string()),
            username: result.username.clone(),
            home_tenant_id: result.home_tenant_id.clone(),
            tenant_ids: result.tenant_ids.clone(),
            subscription_ids: result.subscription_ids.clone(),
            error: result.error.as_ref().map(ToString::to_string),
            tenant_error: result.tenant_error.as_ref().map(ToString::to_string),
        }
    }
}

struct BrokerCredApp {
    config: ResolverConfig,
    log_writer: ResolutionLogWriter,
    exchange: Arc<dyn TokenExchange>,
    tenant_lister: Arc<dyn TenantLister>,
}

impl BrokerCredApp {
    fn new(config: ResolverConfig) -> Self {
        let exchange: Arc<dyn TokenExchange> =
            Arc::new(AzureCliExchange::new(config.az_executable.clone()));
        Self::with_clients(config, exchange, Arc::new(ArmTenantLister::default()))
    }

    fn with_clients(
        config: ResolverConfig,
        exchange: Arc<dyn TokenExchange>,
        tenant_lister: Arc<dyn TenantLister>,
    ) -> Self {
        let log_writer = ResolutionLogWriter::new(config.log_dir.clone());
        Self {
            config,
            log_writer,
            exchange,
            tenant_lister,
        }
    }

    fn resolver(
        &self,
        source: Source,
        environment: Option<CloudEnvironment>,
    ) -> Box<dyn AccountResolver> {
        match source {
            Source::Broker => Box::new(
                BrokerCacheResolver::from_config(
                    &self.config,
                    Arc::clone(&self.exchange),
                    Arc::clone(&self.tenant_lister),
                )
                .with_environment(environment.or(self.config.environment)),
            ),
            Source::SecretFile => Box::new(SecretFileResolver::new(
                self.config.secret_file_path.clone(),
                Arc::clone(&self.exchange),
            )),
        }
    }

    fn resolve(
        &self,
        source: Source,
        environment: Option<CloudEnvironment>,
        json: bool,
    ) -> CliResult<()> {
        let result = self.resolver(source, environment).resolve();
        self.log_writer.record(&result);

        if json {
            let report = ResolutionReport::from(&result);
            let encoded = serde_json::to_string_pretty(&report)
                .map_err(|err| CliError::new(format!("failed to encode report: {}", err), 1))?;
            println!("{}", encoded);
        } else {
            for line in resolution_lines(&result) {
                println!("{}", line);
            }
        }
        Ok(())
    }

    fn list_accounts(&self) -> CliResult<()> {
        for line in self.account_lines()? {
            println!("{}", line);
        }
        Ok(())
    }

    fn account_lines(&self) -> CliResult<Vec<String>> {
        let cache = match TokenCache::read(&self.config.cache_path) {
            Ok(cache) => cache,
            Err(AuthError::CacheUnavailable(path)) => {
                return Ok(vec![format!("no broker token cache at {}", path)]);
            }
            Err(err) => return Err(err.into()),
        };

        let index = index_accounts(cache.accounts());
        let mut lines = Vec::new();
        for account in cache.accounts() {
            let first_seen = index
                .get(account.home_account_id.as_str())
                .is_some_and(|indexed| std::ptr::eq(*indexed, account));
            if !first_seen {
                continue;
            }

            let mut clouds: Vec<CloudEnvironment> = Vec::new();
            for token in cache.access_tokens() {
                if token.home_account_id != account.home_account_id
                    || !token.issued_to(&self.config.client_id)
                {
                    continue;
                }
                if let Some(environment) = CloudEnvironment::match_by_prefix(&token.target) {
                    if !clouds.contains(&environment) {
                        clouds.push(environment);
                    }
                }
            }
            let clouds = if clouds.is_empty() {
                "-".to_string()
            } else {
                clouds
                    .iter()
                    .map(ToString::to_string)
                    .collect::<Vec<_>>()
                    .join(",")
            };

            lines.push(format!(
                "{}\t{}\t{}\t{}",
                display_or_dash(&account.username),
                display_or_dash(&account.environment),
                display_or_dash(&account.realm),
                clouds
            ));
        }

        if lines.is_empty() {
            lines.push("no accounts in broker token cache".to_string());
        }
        Ok(lines)
    }
}

fn main() {
    init_tracing();
    if let Err(err) = run() {
        eprintln!("brokercred: {}", err.message);
        std::process::exit(err.exit_code);
    }
}

fn run() -> CliResult<()> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let command = CliCommand::parse(&args)?;
    dispatch(command, || {
        let config = ResolverConfig::from_env(default_home_dir())?;
        Ok(BrokerCredApp::new(config))
    })
}

/// Runs `command`, building the app only for commands that read the cache.
fn dispatch<F>(command: CliCommand, load_app: F) -> CliResult<()>
where
    F: FnOnce() -> CliResult<BrokerCredApp>,
{
    match command {
        CliCommand::Help => {
            print_usage();
            Ok(())
        }
        CliCommand::Resolve {
            environment,
            source,
            json,
        } => load_app()?.resolve(source, environment, json),
        CliCommand::Accounts => load_app()?.list_accounts(),
        CliCommand::Environments => {
            for line in environment_lines() {
                println!("{}", line);
            }
            Ok(())
        }
    }
}

fn print_usage() {
    println!(
        "brokercred - reuse the IDE broker's cached sign-in\n\n\
         Usage:\n\
           brokercred [resolve] [--environment <name>] [--source broker|secret-file] [--json]\n\
                                      Resolve the cached account and list its tenants\n\
           brokercred accounts        List signed-in accounts in the broker cache\n\
           brokercred environments    List known cloud environments in priority order\n\
           brokercred help            Show this help"
    );
}

fn init_tracing() {
    let filter =
        EnvFilter::try_from_env(LOG_FILTER_ENV).unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

fn default_home_dir() -> PathBuf {
    std::env::var_os("HOME")
        .or_else(|| std::env::var_os("USERPROFILE"))
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."))
}

fn resolution_lines(result: &AccountResolutionResult) -> Vec<String> {
    let mut lines = vec![
        format!("method: {}", result.method.as_str()),
        format!("outcome: {}", result.outcome.as_str()),
        format!("authenticated: {}", result.authenticated),
    ];
    if let Some(environment) = result.environment {
        lines.push(format!("environment: {}", environment));
    }
    if let Some(username) = result.username.as_deref() {
        lines.push(format!("account: {}", username));
    }
    if result.authenticated {
        let tenants = if result.tenant_ids.is_empty() {
            "-".to_string()
        } else {
            result.tenant_ids.join(", ")
        };
        lines.push(format!("tenants: {}", tenants));
    }
    if !result.subscription_ids.is_empty() {
        lines.push(format!("subscriptions: {}", result.subscription_ids.join(", ")));
    }
    if let Some(error) = result.error.as_ref() {
        lines.push(format!("error: {}", error));
    }
    if let Some(error) = result.tenant_error.as_ref() {
        lines.push(format!("tenant error: {}", error));
    }
    lines
}

fn environment_lines() -> Vec<String> {
    CloudEnvironment::all()
        .iter()
        .map(|environment| {
            let marker = if environment.is_global() { " (preferred)" } else { "" };
            format!(
                "{}\t{}\t{}{}",
                environment,
                environment.management_endpoint(),
                environment.resource_manager_endpoint(),
                marker
            )
        })
        .collect()
}

fn display_or_dash(value: &str) -> &str {
    if value.trim().is_empty() {
        "-"
    } else {
        value
    }
}
