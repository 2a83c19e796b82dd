//! Load test for the ouvidoria (public complaints desk) API.
//!
//! 80% citizens filing and looking up complaints, 20% managers working
//! through them in the admin panel:
//!
//! ```text
//! RUST_LOG=info cargo run --example ouvidoria -- -u 50 -r 5 -t 2m --host http://localhost:3001
//! ```
use std::{sync::Arc, time::Duration};

use anyhow::Context;
use clap::Parser;
use rand::Rng;
use serde_json::{Value, json};
use stampede::{
    Action, ActionError, ActionResult, ActionSpec, LoadTest, Pacing, Request, RunConfig, StatusCode, Step, TagFilter,
    UserClass, UserContext, action, hook,
    report::{JsonReporter, Reporter, StdoutReporter},
    transport::HttpTransport,
};
use tracing_subscriber::EnvFilter;

const TIPOS: &[&str] = &["RECLAMACAO", "SUGESTAO", "ELOGIO", "DENUNCIA", "SOLICITACAO"];

const ORGAOS: &[&str] = &[
    "Secretaria de Estado de Governo",
    "Secretaria de Estado de Economia",
    "Secretaria de Estado de Saude",
    "Secretaria de Estado de Educacao",
    "Secretaria de Estado de Seguranca Publica",
    "Secretaria de Estado de Transporte e Mobilidade",
    "Secretaria de Estado de Desenvolvimento Urbano e Habitacao",
    "Secretaria de Estado de Meio Ambiente",
    "Secretaria de Estado de Desenvolvimento Social",
    "Secretaria de Estado de Cultura e Economia Criativa",
    "Controladoria-Geral do Distrito Federal",
];

const ASSUNTOS: &[&str] = &[
    "Demora no atendimento",
    "Problema com iluminacao publica",
    "Buraco na via principal",
    "Elogio ao atendimento do servidor",
    "Solicitacao de poda de arvore",
    "Denuncia de irregularidade",
    "Melhoria no transporte publico",
    "Falta de medicamento na UBS",
    "Sugestao de ciclovia",
    "Reclamacao sobre limpeza urbana",
];

const RELATOS: &[&str] = &[
    "Estou relatando um problema que ocorreu no dia informado. \
     Aguardei por muito tempo e nao obtive atendimento adequado. \
     Solicito providencias por parte do orgao responsavel.",
    "Gostaria de registrar minha insatisfacao com o servico prestado. \
     O atendimento foi demorado e os funcionarios nao souberam orientar. \
     Espero que medidas sejam tomadas para melhorar a qualidade.",
    "Venho por meio desta parabenizar a equipe pelo excelente trabalho \
     realizado. O atendimento foi rapido, eficiente e cordial. \
     Que sirva de exemplo para outros orgaos.",
    "Solicito informacoes sobre os programas sociais disponiveis. \
     Preciso saber quais documentos sao necessarios e onde devo \
     comparecer para realizar meu cadastro.",
    "Denuncio irregularidade observada no local e data informados. \
     Ha evidencias de uso indevido de recursos publicos. \
     Solicito investigacao e providencias cabiveis.",
];

const LOCAIS: &[&str] = &[
    "UPA do Gama, Setor Central",
    "Rodoviaria do Plano Piloto",
    "Hospital Regional de Taguatinga",
    "Administracao Regional de Ceilandia",
    "Escola Classe 01 de Sobradinho",
    "Terminal de Onibus do Nucleo Bandeirante",
    "Parque da Cidade Sarah Kubitschek",
];

const HORARIOS: &[&str] = &["manha", "tarde", "noite", "madrugada", "nao_lembro"];

const NOMES: &[&str] = &[
    "Maria Silva",
    "Joao Santos",
    "Ana Oliveira",
    "Carlos Souza",
    "Fernanda Lima",
    "Pedro Costa",
    "Juliana Almeida",
    "Rafael Pereira",
];

const STATUSES: &[&str] = &["RECEBIDA", "EM_ANALISE", "RESPONDIDA", "ARQUIVADA"];

/// Protocols shipped with the seeded database, used until citizens created
/// their own.
const SEED_PROTOCOLS: &[&str] = &[
    "2024-000001",
    "2024-000002",
    "2024-000003",
    "2024-000004",
    "2024-000005",
];

const PROTOCOLS: &str = "protocols";
const IDS: &str = "ids";

const ADMIN_EMAIL: &str = "admin@cgdf.gov.br";
const ADMIN_PASSWORD: &str = "admin123";

fn pick(ctx: &mut UserContext, items: &'static [&'static str]) -> &'static str {
    ctx.choose(items).copied().unwrap_or_default()
}

fn random_phone(ctx: &mut UserContext) -> String {
    format!(
        "(61) 9{}-{}",
        ctx.rng().random_range(1000..=9999),
        ctx.rng().random_range(1000..=9999)
    )
}

fn random_email(ctx: &mut UserContext, name: &str) -> String {
    let slug = name.to_lowercase().replace(' ', ".");
    format!("{slug}{}@email.com", ctx.rng().random_range(1..=9999))
}

#[action]
async fn health_check(ctx: &mut UserContext) -> ActionResult {
    ctx.request("/health", Request::get("/health")).send().await;
    Ok(Step::Completed)
}

#[action]
async fn create_complaint(ctx: &mut UserContext) -> ActionResult {
    let anonymous = ctx.rng().random_bool(0.5);
    let mut payload = json!({
        "tipo": pick(ctx, TIPOS),
        "orgao": pick(ctx, ORGAOS),
        "assunto": pick(ctx, ASSUNTOS),
        "relato": pick(ctx, RELATOS),
        "local": pick(ctx, LOCAIS),
        "horarioFato": pick(ctx, HORARIOS),
        "pessoasEnvolvidas": "Servidor de plantao",
        "anonimo": anonymous,
    });
    if !anonymous {
        let name = pick(ctx, NOMES);
        payload["nome"] = json!(name);
        payload["email"] = json!(random_email(ctx, name));
        payload["telefone"] = json!(random_phone(ctx));
    }

    let exchange = ctx
        .request(
            "/api/manifestacoes [POST]",
            Request::post("/api/manifestacoes").json_value(payload),
        )
        .expect_status(StatusCode::CREATED)
        .send()
        .await;
    if !exchange.is_success() {
        return Ok(Step::Completed);
    }

    let Some(body) = exchange.json::<Value>()? else {
        return Ok(Step::Completed);
    };
    if let Some(protocol) = body["protocolo"].as_str() {
        ctx.registry().append(PROTOCOLS, protocol);
    }
    match &body["manifestacao"]["id"] {
        Value::String(id) => ctx.registry().append(IDS, id.as_str()),
        Value::Number(id) => ctx.registry().append(IDS, id.to_string()),
        _ => {}
    }
    Ok(Step::Completed)
}

#[action]
async fn lookup_protocol(ctx: &mut UserContext) -> ActionResult {
    let Some(protocol) = ctx.sample_or(PROTOCOLS, SEED_PROTOCOLS) else {
        return Ok(Step::Skipped("no protocol"));
    };
    ctx.request(
        "/api/manifestacoes/:protocolo [GET]",
        Request::get(format!("/api/manifestacoes/{protocol}")),
    )
    .send()
    .await;
    Ok(Step::Completed)
}

#[action]
async fn lookup_missing_protocol(ctx: &mut UserContext) -> ActionResult {
    ctx.request(
        "/api/manifestacoes/:protocolo [GET 404]",
        Request::get("/api/manifestacoes/0000-000000"),
    )
    .send()
    .await;
    Ok(Step::Completed)
}

#[hook]
async fn login(ctx: &mut UserContext) -> Result<(), ActionError> {
    let exchange = ctx
        .request(
            "/api/auth/login",
            Request::post("/api/auth/login")
                .json(&json!({ "email": ADMIN_EMAIL, "senha": ADMIN_PASSWORD }))?,
        )
        .expect_status(StatusCode::OK)
        .send()
        .await;
    if let Some(reason) = exchange.outcome.failure_reason() {
        return Err(ActionError::msg(format!("login failed: {reason}")));
    }

    let token = exchange
        .json::<Value>()?
        .and_then(|body| body["token"].as_str().map(str::to_string))
        .ok_or_else(|| ActionError::msg("login response carried no token"))?;
    ctx.session_mut().set_token(token);
    Ok(())
}

/// Skips the calling action unless the manager is logged in.
macro_rules! require_login {
    ($ctx:expr) => {
        if !$ctx.session().is_authenticated() {
            return Ok(Step::Skipped("not logged in"));
        }
    };
}

/// Skips the calling action until some complaint has been created.
macro_rules! require_complaint {
    ($ctx:expr) => {
        match $ctx.sample(IDS) {
            Some(id) => id,
            None => return Ok(Step::Skipped("no complaint created yet")),
        }
    };
}

#[action]
async fn dashboard(ctx: &mut UserContext) -> ActionResult {
    require_login!(ctx);
    ctx.request("/api/admin/dashboard", Request::get("/api/admin/dashboard"))
        .send()
        .await;
    Ok(Step::Completed)
}

#[action]
async fn list_complaints(ctx: &mut UserContext) -> ActionResult {
    require_login!(ctx);
    let mut request = Request::get("/api/admin/manifestacoes")
        .query("page", "1")
        .query("limit", "10");
    request = match pick(ctx, &["none", "status", "tipo", "orgao", "search"]) {
        "status" => request.query("status", pick(ctx, STATUSES)),
        "tipo" => request.query("tipo", pick(ctx, TIPOS)),
        "orgao" => request.query("orgao", pick(ctx, ORGAOS)),
        "search" => request.query("search", pick(ctx, &["atendimento", "transporte", "saude"])),
        _ => request,
    };
    ctx.request("/api/admin/manifestacoes [GET]", request)
        .send()
        .await;
    Ok(Step::Completed)
}

#[action]
async fn complaint_detail(ctx: &mut UserContext) -> ActionResult {
    require_login!(ctx);
    let id = require_complaint!(ctx);
    ctx.request(
        "/api/admin/manifestacoes/:id [GET]",
        Request::get(format!("/api/admin/manifestacoes/{id}")),
    )
    .send()
    .await;
    Ok(Step::Completed)
}

#[action]
async fn update_status(ctx: &mut UserContext) -> ActionResult {
    require_login!(ctx);
    let id = require_complaint!(ctx);
    let status = pick(ctx, STATUSES);
    ctx.request(
        "/api/admin/manifestacoes/:id/status [PATCH]",
        Request::patch(format!("/api/admin/manifestacoes/{id}/status"))
            .json(&json!({ "status": status }))?,
    )
    .send()
    .await;
    Ok(Step::Completed)
}

#[action]
async fn reply_to_complaint(ctx: &mut UserContext) -> ActionResult {
    require_login!(ctx);
    let id = require_complaint!(ctx);
    let text = format!(
        "Prezado(a) cidadao(a), agradecemos sua manifestacao. \
         Informamos que sua demanda foi encaminhada ao setor \
         responsavel para analise e providencias. Ref. interna: {}.",
        ctx.rng().random_range(1000..=9999)
    );
    ctx.request(
        "/api/admin/manifestacoes/:id/resposta [POST]",
        Request::post(format!("/api/admin/manifestacoes/{id}/resposta"))
            .json(&json!({ "texto": text }))?,
    )
    .send()
    .await;
    Ok(Step::Completed)
}

fn citizen() -> UserClass {
    UserClass::new("citizen")
        .weight(8)
        .pacing(Pacing::between(Duration::from_secs(1), Duration::from_secs(5)))
        .action(ActionSpec::new("health_check", HealthCheck).tag("health"))
        .action(ActionSpec::new("create_complaint", CreateComplaint).weight(3).tag("criar"))
        .action(ActionSpec::new("lookup_protocol", LookupProtocol).weight(5).tag("consultar"))
        .action(ActionSpec::new("lookup_missing_protocol", LookupMissingProtocol).tag("consultar"))
}

fn admin(name: &str, weight: u32, action: impl Action) -> ActionSpec {
    ActionSpec::new(name, action).weight(weight).tag("admin")
}

fn manager() -> UserClass {
    UserClass::new("manager")
        .weight(2)
        .pacing(Pacing::between(Duration::from_secs(2), Duration::from_secs(6)))
        .on_start(Login)
        .action(admin("dashboard", 3, Dashboard))
        .action(admin("list_complaints", 5, ListComplaints))
        .action(admin("complaint_detail", 3, ComplaintDetail))
        .action(admin("update_status", 2, UpdateStatus))
        .action(admin("reply_to_complaint", 1, ReplyToComplaint))
}

fn parse_duration(s: &str) -> Result<Duration, String> {
    let s = s.trim();
    let (digits, unit) = s.split_at(s.find(|c: char| !c.is_ascii_digit()).unwrap_or(s.len()));
    let n: u64 = digits
        .parse()
        .map_err(|_| format!("invalid duration `{s}`, expected e.g. 90s, 2m or 1h"))?;
    match unit {
        "" | "s" => Ok(Duration::from_secs(n)),
        "m" => Ok(Duration::from_secs(n * 60)),
        "h" => Ok(Duration::from_secs(n * 3600)),
        _ => Err(format!("unknown duration unit `{unit}`")),
    }
}

#[derive(Debug, Parser)]
#[command(about = "Load test for the ouvidoria API")]
struct Args {
    /// Base URL of the system under test
    #[arg(long, default_value = "http://localhost:3001")]
    host: String,
    /// Number of concurrent users
    #[arg(short, long, default_value_t = 50)]
    users: usize,
    /// Users spawned per second
    #[arg(short = 'r', long, default_value_t = 5.0)]
    spawn_rate: f64,
    /// Run time, e.g. 90s, 2m, 1h
    #[arg(short = 't', long, value_parser = parse_duration, default_value = "2m")]
    run_time: Duration,
    /// Only run actions with one of these tags
    #[arg(long, value_delimiter = ',')]
    tags: Vec<String>,
    /// Never run actions with any of these tags
    #[arg(long, value_delimiter = ',')]
    exclude_tags: Vec<String>,
    /// Seed for reproducible user choices
    #[arg(long)]
    seed: Option<u64>,
    /// Seconds between periodic reports
    #[arg(long, default_value_t = 10)]
    report_every: u64,
    /// Per-request timeout in seconds
    #[arg(long, default_value_t = 30)]
    timeout: u64,
    /// Emit reports as JSON lines instead of tables
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
    let args = Args::parse();

    let tags = if args.tags.is_empty() {
        TagFilter::all()
    } else {
        TagFilter::include(args.tags)
    }
    .exclude(args.exclude_tags);

    let mut config = RunConfig::builder()
        .users(args.users)
        .spawn_rate(args.spawn_rate)
        .duration(args.run_time)
        .tags(tags)
        .report_interval(Duration::from_secs(args.report_every.max(1)))
        .build();
    config.seed = args.seed;

    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(args.timeout))
        .build()
        .context("building http client")?;
    let reporter: Arc<dyn Reporter> = if args.json {
        Arc::new(JsonReporter::stdout())
    } else {
        Arc::new(StdoutReporter)
    };

    let test = LoadTest::builder()
        .name("ouvidoria")
        .classes(vec![citizen(), manager()])
        .transport(Arc::new(HttpTransport::with_client(client, args.host)))
        .config(config)
        .reporter(reporter)
        .build();

    let stop = test.stop_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("ctrl-c received, stopping");
            stop.stop();
        }
    });

    let summary = test.run().await?;
    tracing::info!(
        reason = ?summary.reason,
        users = ?summary.users_spawned,
        start_failures = summary.start_failures,
        still_draining = summary.still_draining,
        "done"
    );
    Ok(())
}
