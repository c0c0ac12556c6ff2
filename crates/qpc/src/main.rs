use std::path::PathBuf;

use anyhow::{anyhow, bail, Context, Result};
use chrono::{DateTime, Utc};
use clap::{Args, Parser, Subcommand};
use qpc_core::auth::DeviceAuthFlow;
use qpc_core::config::{
    ClientToken, ConfigStore, InsightsConfig, InsightsToken, ServerConfig, SslVerify,
};
use qpc_core::request::ApiClient;
use qpc_core::services::{
    check_details_payload, CredentialAddOptions, CredentialEditOptions, CredentialService,
    InsightsService, JobAction, ProviderType, ReportService, ScanAddOptions, ScanService,
    ServerService, SourceAddOptions, SourceEditOptions, SourceService,
};
use serde_json::Value;
use tokio::task;

#[derive(Parser, Debug)]
#[command(author, version, about = "Inventory and scanning server CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Server connection, session, and status commands
    #[command(subcommand)]
    Server(ServerCommand),
    /// Authentication credentials for scan sources
    #[command(subcommand)]
    Credential(CredentialCommand),
    /// Sources describing what to scan
    #[command(subcommand)]
    Source(SourceCommand),
    /// Scans and their jobs
    #[command(subcommand)]
    Scan(ScanCommand),
    /// Finished report retrieval and merging
    #[command(subcommand)]
    Report(ReportCommand),
    /// Insights console configuration and uploads
    #[command(subcommand)]
    Insights(InsightsCommand),
}

#[derive(Subcommand, Debug)]
enum ServerCommand {
    /// Persist the server host, port, and TLS policy
    Config(ServerConfigArgs),
    /// Obtain and store an API token
    Login(ServerLoginArgs),
    /// Invalidate the session and forget the stored token
    Logout,
    /// Show the server status endpoint
    Status,
}

#[derive(Args, Debug)]
struct ServerConfigArgs {
    /// Server hostname or address
    #[arg(long)]
    host: String,
    /// Server port
    #[arg(long, default_value_t = 9443)]
    port: u16,
    /// Use plain HTTP instead of HTTPS
    #[arg(long)]
    use_http: bool,
    /// TLS verification: "true", "false", or a CA bundle path
    #[arg(long = "ssl-verify")]
    ssl_verify: Option<String>,
    /// Whether the server requires an API token (defaults to true)
    #[arg(long = "require-token")]
    require_token: Option<bool>,
}

#[derive(Args, Debug)]
struct ServerLoginArgs {
    /// Account to log in as; the password is prompted for
    #[arg(long)]
    username: String,
}

#[derive(Subcommand, Debug)]
enum CredentialCommand {
    /// Add a credential
    Add(CredentialAddArgs),
    /// Update fields on an existing credential
    Edit(CredentialEditArgs),
    /// List credentials
    List(TypeListArgs),
    /// Show a single credential by name
    Show(NameShowArgs),
    /// Delete one credential or all of them
    Clear(ClearArgs),
}

#[derive(Args, Debug)]
struct CredentialAddArgs {
    #[arg(long)]
    name: String,
    /// Credential type: network, vcenter, or satellite
    #[arg(long = "type")]
    cred_type: String,
    #[arg(long)]
    username: String,
    /// Prompt for a password
    #[arg(long)]
    password: bool,
    /// Path to an SSH key readable by the server
    #[arg(long = "sshkeyfile")]
    ssh_keyfile: Option<PathBuf>,
    /// Prompt for a privilege-escalation password
    #[arg(long = "become-password")]
    become_password: bool,
}

#[derive(Args, Debug)]
struct CredentialEditArgs {
    #[arg(long)]
    name: String,
    #[arg(long)]
    username: Option<String>,
    /// Prompt for a new password
    #[arg(long)]
    password: bool,
    /// Path to an SSH key readable by the server
    #[arg(long = "sshkeyfile")]
    ssh_keyfile: Option<PathBuf>,
    /// Prompt for a new privilege-escalation password
    #[arg(long = "become-password")]
    become_password: bool,
}

#[derive(Args, Debug)]
struct TypeListArgs {
    /// Filter by type: network, vcenter, or satellite
    #[arg(long = "type")]
    kind: Option<String>,
    /// Output raw JSON
    #[arg(long)]
    json: bool,
}

#[derive(Args, Debug)]
struct NameShowArgs {
    #[arg(long)]
    name: String,
    /// Output raw JSON
    #[arg(long)]
    json: bool,
}

#[derive(Args, Debug)]
struct ClearArgs {
    /// Name of the record to delete
    #[arg(long, required_unless_present = "all", conflicts_with = "all")]
    name: Option<String>,
    /// Delete every record
    #[arg(long)]
    all: bool,
}

#[derive(Subcommand, Debug)]
enum SourceCommand {
    /// Add a source
    Add(SourceAddArgs),
    /// Update fields on an existing source
    Edit(SourceEditArgs),
    /// List sources
    List(TypeListArgs),
    /// Show a single source by name
    Show(NameShowArgs),
    /// Delete one source or all of them
    Clear(ClearArgs),
}

#[derive(Args, Debug)]
struct SourceAddArgs {
    #[arg(long)]
    name: String,
    /// Source type: network, vcenter, or satellite
    #[arg(long = "type")]
    source_type: String,
    /// Hosts, addresses, or CIDR ranges to scan (repeatable)
    #[arg(long = "hosts", required = true, num_args = 1..)]
    hosts: Vec<String>,
    /// Connection port override
    #[arg(long)]
    port: Option<u16>,
    /// Credential names to use (repeatable)
    #[arg(long = "cred", required = true, num_args = 1..)]
    credentials: Vec<String>,
}

#[derive(Args, Debug)]
struct SourceEditArgs {
    #[arg(long)]
    name: String,
    /// Replace the host list (repeatable)
    #[arg(long = "hosts", num_args = 1..)]
    hosts: Vec<String>,
    /// Connection port override
    #[arg(long)]
    port: Option<u16>,
    /// Replace the credential list (repeatable)
    #[arg(long = "cred", num_args = 1..)]
    credentials: Vec<String>,
}

#[derive(Subcommand, Debug)]
enum ScanCommand {
    /// Define a scan over one or more sources
    Add(ScanAddArgs),
    /// Start a job for a scan
    Start(ScanNameArgs),
    /// List scans
    List(JsonArgs),
    /// Show a single scan by name
    Show(NameShowArgs),
    /// Show a scan job by id
    Job(JobArgs),
    /// Pause a running job
    Pause(JobIdArgs),
    /// Cancel a job
    Cancel(JobIdArgs),
    /// Restart a paused job
    Restart(JobIdArgs),
    /// Delete one scan or all of them
    Clear(ClearArgs),
}

#[derive(Args, Debug)]
struct ScanAddArgs {
    #[arg(long)]
    name: String,
    /// Source names to include (repeatable)
    #[arg(long = "sources", required = true, num_args = 1..)]
    sources: Vec<String>,
    /// Maximum concurrent inspection connections
    #[arg(long = "max-concurrency")]
    max_concurrency: Option<u32>,
}

#[derive(Args, Debug)]
struct ScanNameArgs {
    #[arg(long)]
    name: String,
}

#[derive(Args, Debug)]
struct JsonArgs {
    /// Output raw JSON
    #[arg(long)]
    json: bool,
}

#[derive(Args, Debug)]
struct JobArgs {
    #[arg(long)]
    id: i64,
    /// Output raw JSON
    #[arg(long)]
    json: bool,
}

#[derive(Args, Debug)]
struct JobIdArgs {
    #[arg(long)]
    id: i64,
}

#[derive(Subcommand, Debug)]
enum ReportCommand {
    /// Raw fact collection for a report
    Details(ReportFetchArgs),
    /// Deduplicated system view for a report
    Deployments(ReportFetchArgs),
    /// Validate local details reports and upload them as one merged report
    Merge(ReportMergeArgs),
}

#[derive(Args, Debug)]
struct ReportFetchArgs {
    /// Report id
    #[arg(long, required_unless_present = "scan_job", conflicts_with = "scan_job")]
    report: Option<i64>,
    /// Resolve the report from a scan job id
    #[arg(long = "scan-job")]
    scan_job: Option<i64>,
    /// Write the report to a file instead of stdout
    #[arg(long = "output-file")]
    output_file: Option<PathBuf>,
}

#[derive(Args, Debug)]
struct ReportMergeArgs {
    /// Details-report JSON files to merge (repeatable)
    #[arg(long = "json-files", required = true, num_args = 1..)]
    json_files: Vec<PathBuf>,
}

#[derive(Subcommand, Debug)]
enum InsightsCommand {
    /// Persist the insights console and SSO hosts
    Config(InsightsConfigArgs),
    /// Log in to the console via device authorization
    Login,
    /// Upload a local details report to the console
    Publish(InsightsPublishArgs),
}

#[derive(Args, Debug)]
struct InsightsConfigArgs {
    /// Console hostname
    #[arg(long)]
    host: String,
    /// Console port
    #[arg(long, default_value_t = 443)]
    port: u16,
    /// Use plain HTTP instead of HTTPS
    #[arg(long)]
    use_http: bool,
    /// Single sign-on hostname used for login
    #[arg(long = "sso-host")]
    sso_host: String,
}

#[derive(Args, Debug)]
struct InsightsPublishArgs {
    /// Details-report JSON file to upload
    #[arg(long = "input-file")]
    input_file: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    match cli.command {
        Commands::Server(cmd) => match cmd {
            ServerCommand::Config(args) => server_config(args)?,
            ServerCommand::Login(args) => server_login(args).await?,
            ServerCommand::Logout => server_logout().await?,
            ServerCommand::Status => server_status().await?,
        },
        Commands::Credential(cmd) => match cmd {
            CredentialCommand::Add(args) => credential_add(args).await?,
            CredentialCommand::Edit(args) => credential_edit(args).await?,
            CredentialCommand::List(args) => credential_list(args).await?,
            CredentialCommand::Show(args) => credential_show(args).await?,
            CredentialCommand::Clear(args) => credential_clear(args).await?,
        },
        Commands::Source(cmd) => match cmd {
            SourceCommand::Add(args) => source_add(args).await?,
            SourceCommand::Edit(args) => source_edit(args).await?,
            SourceCommand::List(args) => source_list(args).await?,
            SourceCommand::Show(args) => source_show(args).await?,
            SourceCommand::Clear(args) => source_clear(args).await?,
        },
        Commands::Scan(cmd) => match cmd {
            ScanCommand::Add(args) => scan_add(args).await?,
            ScanCommand::Start(args) => scan_start(args).await?,
            ScanCommand::List(args) => scan_list(args).await?,
            ScanCommand::Show(args) => scan_show(args).await?,
            ScanCommand::Job(args) => scan_job(args).await?,
            ScanCommand::Pause(args) => scan_job_action(args, JobAction::Pause).await?,
            ScanCommand::Cancel(args) => scan_job_action(args, JobAction::Cancel).await?,
            ScanCommand::Restart(args) => scan_job_action(args, JobAction::Restart).await?,
            ScanCommand::Clear(args) => scan_clear(args).await?,
        },
        Commands::Report(cmd) => match cmd {
            ReportCommand::Details(args) => report_fetch(args, ReportFlavor::Details).await?,
            ReportCommand::Deployments(args) => {
                report_fetch(args, ReportFlavor::Deployments).await?
            }
            ReportCommand::Merge(args) => report_merge(args).await?,
        },
        Commands::Insights(cmd) => match cmd {
            InsightsCommand::Config(args) => insights_config(args)?,
            InsightsCommand::Login => insights_login().await?,
            InsightsCommand::Publish(args) => insights_publish(args).await?,
        },
    }
    Ok(())
}

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_env("QPC_LOG")
        .or_else(|_| tracing_subscriber::EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn config_store() -> Result<ConfigStore> {
    ConfigStore::with_default_locator().context("unable to initialise configuration store")
}

/// Build the API client for an authenticated command. Configuration is
/// read once here; nothing re-reads it mid-command.
fn api_client(store: &ConfigStore, command: &str) -> Result<ApiClient> {
    let config = store.require_server_config()?;
    let token = store.load_client_token()?.map(|record| record.token);
    if config.require_token && token.is_none() {
        bail!("not logged in; run `qpc server login` first");
    }
    Ok(ApiClient::new(&config, token)?.for_command(command))
}

fn anonymous_client(store: &ConfigStore, command: &str) -> Result<ApiClient> {
    let config = store.require_server_config()?;
    Ok(ApiClient::new(&config, None)?.for_command(command))
}

async fn prompt(label: &'static str) -> Result<String> {
    let input = task::spawn_blocking(move || -> std::io::Result<String> {
        use std::io::{self, Write};
        print!("{label}: ");
        io::stdout().flush()?;
        let mut input = String::new();
        io::stdin().read_line(&mut input)?;
        Ok(input.trim().to_owned())
    })
    .await
    .context("prompt interrupted")??;
    if input.is_empty() {
        bail!("a value is required");
    }
    Ok(input)
}

fn parse_ssl_verify(raw: &str) -> SslVerify {
    match raw.to_ascii_lowercase().as_str() {
        "true" => SslVerify::Flag(true),
        "false" => SslVerify::Flag(false),
        _ => SslVerify::CaBundle(PathBuf::from(raw)),
    }
}

fn server_config(args: ServerConfigArgs) -> Result<()> {
    let config = ServerConfig {
        host: args.host,
        port: args.port,
        use_http: args.use_http,
        ssl_verify: args.ssl_verify.as_deref().map(parse_ssl_verify),
        require_token: args.require_token.unwrap_or(true),
    };
    config.validate()?;
    let store = config_store()?;
    store.save_server_config(&config)?;
    println!("Server configured at {}.", config.base_url());
    Ok(())
}

async fn server_login(args: ServerLoginArgs) -> Result<()> {
    let store = config_store()?;
    let client = anonymous_client(&store, "server login")?;
    let password = prompt("Password").await?;
    let token = ServerService::new(client)
        .login(&args.username, &password)
        .await
        .context("login failed")?;
    store.save_client_token(&ClientToken { token })?;
    println!("Login successful.");
    Ok(())
}

async fn server_logout() -> Result<()> {
    let store = config_store()?;
    if store.load_client_token()?.is_some() {
        match api_client(&store, "server logout") {
            Ok(client) => {
                if let Err(err) = ServerService::new(client).logout().await {
                    tracing::warn!(%err, "server-side logout failed; discarding local token");
                }
            }
            Err(err) => tracing::warn!(%err, "skipping server-side logout"),
        }
    }
    store.delete_client_token()?;
    println!("Logged out.");
    Ok(())
}

async fn server_status() -> Result<()> {
    let store = config_store()?;
    let config = store.require_server_config()?;
    let token = store.load_client_token()?.map(|record| record.token);
    let client = ApiClient::new(&config, token)?.for_command("server status");
    let status = ServerService::new(client)
        .status()
        .await
        .context("status request failed")?;
    render_json(&status)
}

async fn credential_add(args: CredentialAddArgs) -> Result<()> {
    let store = config_store()?;
    let service = CredentialService::new(api_client(&store, "credential add")?);
    let cred_type: ProviderType = args.cred_type.parse()?;

    let mut options =
        CredentialAddOptions::new(args.name.clone(), cred_type, args.username.clone());
    options.ssh_keyfile = args.ssh_keyfile;
    if args.password || options.ssh_keyfile.is_none() {
        options.password = Some(prompt("Password").await?);
    }
    if args.become_password {
        options.become_password = Some(prompt("Become password").await?);
    }

    service
        .add(options)
        .await
        .context("failed to add credential")?;
    println!("Credential \"{}\" was added.", args.name);
    Ok(())
}

async fn credential_edit(args: CredentialEditArgs) -> Result<()> {
    let store = config_store()?;
    let service = CredentialService::new(api_client(&store, "credential edit")?);
    let id = service
        .resolve_id(&args.name)
        .await?
        .ok_or_else(|| anyhow!("credential \"{}\" does not exist", args.name))?;

    let mut options = CredentialEditOptions {
        username: args.username,
        ssh_keyfile: args.ssh_keyfile,
        ..Default::default()
    };
    if args.password {
        options.password = Some(prompt("Password").await?);
    }
    if args.become_password {
        options.become_password = Some(prompt("Become password").await?);
    }
    if options.is_empty() {
        bail!("no changes requested; pass at least one field to edit");
    }

    service
        .edit(id, options)
        .await
        .context("failed to update credential")?;
    println!("Credential \"{}\" was updated.", args.name);
    Ok(())
}

async fn credential_list(args: TypeListArgs) -> Result<()> {
    let store = config_store()?;
    let service = CredentialService::new(api_client(&store, "credential list")?);
    let kind = parse_optional_type(args.kind.as_deref())?;
    let credentials = service.list(kind).await.context("listing failed")?;
    if args.json {
        return render_json(&Value::Array(credentials));
    }
    if credentials.is_empty() {
        println!("No credentials found.");
        return Ok(());
    }
    println!("{:<6} {:<24} {:<12} {:<20}", "ID", "NAME", "TYPE", "USERNAME");
    println!("{}", "-".repeat(64));
    for credential in &credentials {
        println!(
            "{:<6} {:<24} {:<12} {:<20}",
            id_field(credential),
            truncate(str_field(credential, "name"), 24),
            str_field(credential, "cred_type"),
            truncate(str_field(credential, "username"), 20),
        );
    }
    Ok(())
}

async fn credential_show(args: NameShowArgs) -> Result<()> {
    let store = config_store()?;
    let service = CredentialService::new(api_client(&store, "credential show")?);
    let credential = service
        .find_by_name(&args.name)
        .await?
        .ok_or_else(|| anyhow!("credential \"{}\" does not exist", args.name))?;
    if args.json {
        return render_json(&credential);
    }
    println!("Name      : {}", str_field(&credential, "name"));
    println!("Type      : {}", str_field(&credential, "cred_type"));
    println!("Username  : {}", str_field(&credential, "username"));
    if let Some(keyfile) = credential.get("ssh_keyfile").and_then(Value::as_str) {
        println!("SSH key   : {keyfile}");
    }
    Ok(())
}

async fn credential_clear(args: ClearArgs) -> Result<()> {
    let store = config_store()?;
    let service = CredentialService::new(api_client(&store, "credential clear")?);
    if args.all {
        let credentials = service.list(None).await?;
        let mut removed = 0usize;
        for credential in &credentials {
            if let Some(id) = credential.get("id").and_then(Value::as_i64) {
                service.delete(id).await?;
                removed += 1;
            }
        }
        println!("Deleted {removed} credential(s).");
        return Ok(());
    }
    let name = args.name.unwrap_or_default();
    let id = service
        .resolve_id(&name)
        .await?
        .ok_or_else(|| anyhow!("credential \"{name}\" does not exist"))?;
    service.delete(id).await.context("delete failed")?;
    println!("Credential \"{name}\" was removed.");
    Ok(())
}

async fn source_add(args: SourceAddArgs) -> Result<()> {
    let store = config_store()?;
    let client = api_client(&store, "source add")?;
    let credential_ids =
        resolve_credential_ids(&CredentialService::new(client.clone()), &args.credentials).await?;
    let service = SourceService::new(client);

    let options = SourceAddOptions {
        name: args.name.clone(),
        source_type: args.source_type.parse()?,
        hosts: args.hosts,
        port: args.port,
        credential_ids,
    };
    service.add(options).await.context("failed to add source")?;
    println!("Source \"{}\" was added.", args.name);
    Ok(())
}

async fn source_edit(args: SourceEditArgs) -> Result<()> {
    let store = config_store()?;
    let client = api_client(&store, "source edit")?;
    let service = SourceService::new(client.clone());
    let id = service
        .resolve_id(&args.name)
        .await?
        .ok_or_else(|| anyhow!("source \"{}\" does not exist", args.name))?;

    let credential_ids = if args.credentials.is_empty() {
        None
    } else {
        Some(
            resolve_credential_ids(&CredentialService::new(client), &args.credentials).await?,
        )
    };
    let options = SourceEditOptions {
        hosts: if args.hosts.is_empty() {
            None
        } else {
            Some(args.hosts)
        },
        port: args.port,
        credential_ids,
    };
    if options.is_empty() {
        bail!("no changes requested; pass at least one field to edit");
    }

    service
        .edit(id, options)
        .await
        .context("failed to update source")?;
    println!("Source \"{}\" was updated.", args.name);
    Ok(())
}

async fn resolve_credential_ids(
    service: &CredentialService,
    names: &[String],
) -> Result<Vec<i64>> {
    let mut ids = Vec::with_capacity(names.len());
    for name in names {
        let id = service
            .resolve_id(name)
            .await?
            .ok_or_else(|| anyhow!("credential \"{name}\" does not exist"))?;
        ids.push(id);
    }
    Ok(ids)
}

async fn source_list(args: TypeListArgs) -> Result<()> {
    let store = config_store()?;
    let service = SourceService::new(api_client(&store, "source list")?);
    let kind = parse_optional_type(args.kind.as_deref())?;
    let sources = service.list(kind).await.context("listing failed")?;
    if args.json {
        return render_json(&Value::Array(sources));
    }
    if sources.is_empty() {
        println!("No sources found.");
        return Ok(());
    }
    println!("{:<6} {:<24} {:<12} {:<36}", "ID", "NAME", "TYPE", "HOSTS");
    println!("{}", "-".repeat(80));
    for source in &sources {
        let hosts = source
            .get("hosts")
            .and_then(Value::as_array)
            .map(|hosts| {
                hosts
                    .iter()
                    .filter_map(Value::as_str)
                    .collect::<Vec<_>>()
                    .join(", ")
            })
            .unwrap_or_default();
        println!(
            "{:<6} {:<24} {:<12} {:<36}",
            id_field(source),
            truncate(str_field(source, "name"), 24),
            str_field(source, "source_type"),
            truncate(&hosts, 36),
        );
    }
    Ok(())
}

async fn source_show(args: NameShowArgs) -> Result<()> {
    let store = config_store()?;
    let service = SourceService::new(api_client(&store, "source show")?);
    let source = service
        .find_by_name(&args.name)
        .await?
        .ok_or_else(|| anyhow!("source \"{}\" does not exist", args.name))?;
    if args.json {
        return render_json(&source);
    }
    println!("Name      : {}", str_field(&source, "name"));
    println!("Type      : {}", str_field(&source, "source_type"));
    if let Some(hosts) = source.get("hosts").and_then(Value::as_array) {
        let joined = hosts
            .iter()
            .filter_map(Value::as_str)
            .collect::<Vec<_>>()
            .join(", ");
        println!("Hosts     : {joined}");
    }
    if let Some(port) = source.get("port").and_then(Value::as_i64) {
        println!("Port      : {port}");
    }
    Ok(())
}

async fn source_clear(args: ClearArgs) -> Result<()> {
    let store = config_store()?;
    let service = SourceService::new(api_client(&store, "source clear")?);
    if args.all {
        let sources = service.list(None).await?;
        let mut removed = 0usize;
        for source in &sources {
            if let Some(id) = source.get("id").and_then(Value::as_i64) {
                service.delete(id).await?;
                removed += 1;
            }
        }
        println!("Deleted {removed} source(s).");
        return Ok(());
    }
    let name = args.name.unwrap_or_default();
    let id = service
        .resolve_id(&name)
        .await?
        .ok_or_else(|| anyhow!("source \"{name}\" does not exist"))?;
    service.delete(id).await.context("delete failed")?;
    println!("Source \"{name}\" was removed.");
    Ok(())
}

async fn scan_add(args: ScanAddArgs) -> Result<()> {
    let store = config_store()?;
    let client = api_client(&store, "scan add")?;
    let source_service = SourceService::new(client.clone());
    let mut source_ids = Vec::with_capacity(args.sources.len());
    for name in &args.sources {
        let id = source_service
            .resolve_id(name)
            .await?
            .ok_or_else(|| anyhow!("source \"{name}\" does not exist"))?;
        source_ids.push(id);
    }

    let service = ScanService::new(client);
    let options = ScanAddOptions {
        name: args.name.clone(),
        source_ids,
        max_concurrency: args.max_concurrency,
    };
    service.add(options).await.context("failed to add scan")?;
    println!("Scan \"{}\" was added.", args.name);
    Ok(())
}

async fn scan_start(args: ScanNameArgs) -> Result<()> {
    let store = config_store()?;
    let service = ScanService::new(api_client(&store, "scan start")?);
    let id = service
        .resolve_id(&args.name)
        .await?
        .ok_or_else(|| anyhow!("scan \"{}\" does not exist", args.name))?;
    let job = service.start(id).await.context("failed to start scan")?;
    match job.get("id").and_then(Value::as_i64) {
        Some(job_id) => println!("Scan \"{}\" started; job id {job_id}.", args.name),
        None => println!("Scan \"{}\" started.", args.name),
    }
    Ok(())
}

async fn scan_list(args: JsonArgs) -> Result<()> {
    let store = config_store()?;
    let service = ScanService::new(api_client(&store, "scan list")?);
    let scans = service.list().await.context("listing failed")?;
    if args.json {
        return render_json(&Value::Array(scans));
    }
    if scans.is_empty() {
        println!("No scans found.");
        return Ok(());
    }
    println!("{:<6} {:<24} {:<10}", "ID", "NAME", "SOURCES");
    println!("{}", "-".repeat(42));
    for scan in &scans {
        let source_count = scan
            .get("sources")
            .and_then(Value::as_array)
            .map(Vec::len)
            .unwrap_or_default();
        println!(
            "{:<6} {:<24} {:<10}",
            id_field(scan),
            truncate(str_field(scan, "name"), 24),
            source_count,
        );
    }
    Ok(())
}

async fn scan_show(args: NameShowArgs) -> Result<()> {
    let store = config_store()?;
    let service = ScanService::new(api_client(&store, "scan show")?);
    let scan = service
        .find_by_name(&args.name)
        .await?
        .ok_or_else(|| anyhow!("scan \"{}\" does not exist", args.name))?;
    if args.json {
        return render_json(&scan);
    }
    println!("Name      : {}", str_field(&scan, "name"));
    println!("ID        : {}", id_field(&scan));
    if let Some(job) = scan.get("most_recent").and_then(Value::as_object) {
        if let Some(status) = job.get("status").and_then(Value::as_str) {
            println!("Last job  : {status}");
        }
    }
    Ok(())
}

async fn scan_job(args: JobArgs) -> Result<()> {
    let store = config_store()?;
    let service = ScanService::new(api_client(&store, "scan job")?);
    let job = service.job(args.id).await.context("job lookup failed")?;
    if args.json {
        return render_json(&job);
    }
    render_job(&job);
    Ok(())
}

async fn scan_job_action(args: JobIdArgs, action: JobAction) -> Result<()> {
    let (verb, label) = match action {
        JobAction::Pause => ("pause", "paused"),
        JobAction::Cancel => ("cancel", "canceled"),
        JobAction::Restart => ("restart", "restarted"),
    };
    let store = config_store()?;
    let command = format!("scan {verb}");
    let service = ScanService::new(api_client(&store, &command)?);
    service
        .job_action(args.id, action)
        .await
        .with_context(|| format!("job {} could not be {label}", args.id))?;
    println!("Job {} was {label}.", args.id);
    Ok(())
}

async fn scan_clear(args: ClearArgs) -> Result<()> {
    let store = config_store()?;
    let service = ScanService::new(api_client(&store, "scan clear")?);
    if args.all {
        let scans = service.list().await?;
        let mut removed = 0usize;
        for scan in &scans {
            if let Some(id) = scan.get("id").and_then(Value::as_i64) {
                service.delete(id).await?;
                removed += 1;
            }
        }
        println!("Deleted {removed} scan(s).");
        return Ok(());
    }
    let name = args.name.unwrap_or_default();
    let id = service
        .resolve_id(&name)
        .await?
        .ok_or_else(|| anyhow!("scan \"{name}\" does not exist"))?;
    service.delete(id).await.context("delete failed")?;
    println!("Scan \"{name}\" was removed.");
    Ok(())
}

#[derive(Debug, Clone, Copy)]
enum ReportFlavor {
    Details,
    Deployments,
}

async fn report_fetch(args: ReportFetchArgs, flavor: ReportFlavor) -> Result<()> {
    let store = config_store()?;
    let command = match flavor {
        ReportFlavor::Details => "report details",
        ReportFlavor::Deployments => "report deployments",
    };
    let client = api_client(&store, command)?;

    let report_id = match (args.report, args.scan_job) {
        (Some(report_id), _) => report_id,
        (None, Some(job_id)) => {
            let job = ScanService::new(client.clone())
                .job(job_id)
                .await
                .context("job lookup failed")?;
            job.get("report_id").and_then(Value::as_i64).ok_or_else(|| {
                anyhow!("job {job_id} has not produced a report yet")
            })?
        }
        (None, None) => bail!("--report or --scan-job is required"),
    };

    let service = ReportService::new(client);
    let report = match flavor {
        ReportFlavor::Details => service.details(report_id).await,
        ReportFlavor::Deployments => service.deployments(report_id).await,
    }
    .context("report retrieval failed")?;

    match args.output_file {
        Some(path) => {
            std::fs::write(&path, serde_json::to_string_pretty(&report)?)
                .with_context(|| format!("unable to write {}", path.display()))?;
            println!("Report {report_id} written to {}.", path.display());
        }
        None => render_json(&report)?,
    }
    Ok(())
}

async fn report_merge(args: ReportMergeArgs) -> Result<()> {
    let store = config_store()?;
    let service = ReportService::new(api_client(&store, "report merge")?);
    let merged = service
        .merge(&args.json_files)
        .await
        .context("report merge failed")?;
    match merged.get("id").and_then(Value::as_i64) {
        Some(id) => println!("Merged report created with id {id}."),
        None => println!("Merged report created."),
    }
    Ok(())
}

fn insights_config(args: InsightsConfigArgs) -> Result<()> {
    let config = InsightsConfig {
        host: args.host,
        port: args.port,
        use_http: args.use_http,
        sso_host: args.sso_host,
    };
    let store = config_store()?;
    store.save_insights_config(&config)?;
    println!("Insights console configured at {}.", config.base_url());
    Ok(())
}

async fn insights_login() -> Result<()> {
    let store = config_store()?;
    let config = store
        .load_insights_config()?
        .ok_or_else(|| anyhow!("insights is not configured; run `qpc insights config` first"))?;

    let mut flow = DeviceAuthFlow::new(&config)?;
    let authorization = flow
        .request_auth()
        .await
        .context("device authorization request failed")?
        .clone();

    println!(
        "To log in, visit {} and enter code {}",
        authorization.verification_uri, authorization.user_code
    );
    if let Some(complete) = &authorization.verification_uri_complete {
        if open::that(complete).is_err() {
            println!("Open the URL manually if a browser did not start:\n  {complete}");
        }
    }

    let token = flow
        .wait_for_authorization()
        .await
        .context("authorization was not granted")?;
    store.save_insights_token(&InsightsToken { token })?;
    println!("Insights login complete.");
    Ok(())
}

async fn insights_publish(args: InsightsPublishArgs) -> Result<()> {
    let store = config_store()?;
    let config = store
        .load_insights_config()?
        .ok_or_else(|| anyhow!("insights is not configured; run `qpc insights config` first"))?;
    let token = store
        .load_insights_token()?
        .ok_or_else(|| anyhow!("not logged in to insights; run `qpc insights login` first"))?;

    let raw = std::fs::read_to_string(&args.input_file)
        .with_context(|| format!("unable to read {}", args.input_file.display()))?;
    let payload: Value = serde_json::from_str(&raw)
        .with_context(|| format!("{} is not valid JSON", args.input_file.display()))?;
    if let Err(key) = check_details_payload(&payload) {
        bail!(
            "{} is missing required key '{key}'",
            args.input_file.display()
        );
    }

    let service = InsightsService::new(&config, token.token)?;
    let accepted = service.publish(&payload).await.context("upload failed")?;
    match accepted.get("request_id").and_then(Value::as_str) {
        Some(request_id) => println!("Report accepted; request id {request_id}."),
        None => println!("Report accepted."),
    }
    Ok(())
}

fn parse_optional_type(raw: Option<&str>) -> Result<Option<ProviderType>> {
    raw.map(|value| value.parse::<ProviderType>())
        .transpose()
        .map_err(Into::into)
}

fn render_json(value: &Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn render_job(job: &Value) {
    println!("Job       : {}", id_field(job));
    println!("Status    : {}", str_field(job, "status"));
    if let Some(message) = job.get("status_message").and_then(Value::as_str) {
        println!("Message   : {message}");
    }
    if let Some(report_id) = job.get("report_id").and_then(Value::as_i64) {
        println!("Report    : {report_id}");
    }
    let start = time_field(job, "start_time");
    let end = time_field(job, "end_time");
    if let Some(start) = start {
        println!("Started   : {}", start.to_rfc3339());
    }
    if let (Some(start), Some(end)) = (start, end) {
        println!(
            "Finished  : {} ({}s)",
            end.to_rfc3339(),
            (end - start).num_seconds()
        );
    }
}

fn time_field(item: &Value, key: &str) -> Option<DateTime<Utc>> {
    item.get(key)
        .and_then(Value::as_str)
        .and_then(|raw| raw.parse::<DateTime<Utc>>().ok())
}

fn str_field<'a>(item: &'a Value, key: &str) -> &'a str {
    item.get(key).and_then(Value::as_str).unwrap_or("-")
}

fn id_field(item: &Value) -> String {
    item.get("id")
        .and_then(Value::as_i64)
        .map(|id| id.to_string())
        .unwrap_or_else(|| "-".to_owned())
}

fn truncate(value: &str, max_len: usize) -> String {
    let mut chars = value.chars();
    let mut collected = String::new();
    for _ in 0..max_len.saturating_sub(1) {
        match chars.next() {
            Some(ch) => collected.push(ch),
            None => return value.to_owned(),
        }
    }
    if chars.next().is_some() {
        collected.push('…');
        collected
    } else {
        value.to_owned()
    }
}
