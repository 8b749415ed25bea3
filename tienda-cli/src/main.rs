//! tienda-cli - terminal client for the Tienda HTTP API
//!
//! Lets advisors review and decide pending contracts, browse the plan catalog
//! and read or answer contract chats without the web front end.
//!
//! # Subcommands
//! - `status`                          - server health
//! - `plans [--segment <s>]`           - active plans, cheapest first
//! - `pending`                         - contracts awaiting an advisor
//! - `approve <id>` / `reject <id>`    - decide a pending contract
//! - `conversations [--advisor]`       - chat threads of the current user
//! - `messages <thread>`               - a thread's messages, oldest first
//! - `send <thread> <text>`            - post a message
//!
//! `--json` prints the server's JSON instead of the text layout.

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use serde::Deserialize;
use serde_json::Value;

const DEFAULT_SERVER: &str = "http://127.0.0.1:8780";
const USER_HEADER: &str = "x-user-id";

// ============================================================================
// CLI Definition
// ============================================================================

#[derive(Debug, Parser)]
#[command(name = "tienda-cli", version, about = "Tienda catalog, contracts and advisor chat")]
struct Cli {
    /// Tienda HTTP server URL (overrides TIENDA_HTTP_URL env var)
    #[arg(long, env = "TIENDA_HTTP_URL", default_value = DEFAULT_SERVER)]
    server: String,

    /// Acting user id, sent as the x-user-id header
    #[arg(long, env = "TIENDA_USER_ID")]
    user: Option<String>,

    /// Print raw JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Show server status
    Status,

    /// List active plans
    Plans {
        /// Básico, Medio or Premium
        #[arg(long)]
        segment: Option<String>,
    },

    /// List contracts waiting for approval (advisors)
    Pending,

    /// Approve a pending contract (advisors)
    Approve { id: String },

    /// Reject a pending contract (advisors)
    Reject { id: String },

    /// List chat threads
    Conversations {
        /// List the threads where you are the advisor
        #[arg(long)]
        advisor: bool,
    },

    /// Show the messages of a thread
    Messages { thread: String },

    /// Send a message to a thread
    Send { thread: String, text: String },
}

// ============================================================================
// API Response Types
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct PlanRow {
    pub id: String,
    pub nombre: String,
    pub precio: f64,
    pub segmento: String,
    #[serde(default)]
    pub datos_moviles: String,
    #[serde(default)]
    pub minutos_voz: String,
}

#[derive(Debug, Deserialize)]
pub struct ContractRow {
    pub id: String,
    pub estado: String,
    pub precio_mensual: f64,
    #[serde(default)]
    pub usuario_nombre: Option<String>,
    #[serde(default)]
    pub plan_nombre: Option<String>,
    pub created_at: String,
}

#[derive(Debug, Deserialize)]
pub struct ConversationRow {
    pub contratacion_id: String,
    #[serde(default)]
    pub usuario_nombre: Option<String>,
    #[serde(default)]
    pub plan_nombre: Option<String>,
    #[serde(default)]
    pub ultimo_mensaje: Option<String>,
    #[serde(default)]
    pub no_leidos: i64,
}

#[derive(Debug, Deserialize)]
pub struct MessageRow {
    pub usuario_id: String,
    pub mensaje: String,
    pub leido: bool,
    pub created_at: String,
}

// ============================================================================
// Text layout
// ============================================================================

fn short_id(id: &str) -> &str {
    id.get(..8).unwrap_or(id)
}

fn preview(text: &str, max: usize) -> String {
    let first_line = text.lines().next().unwrap_or("");
    let mut out: String = first_line.chars().take(max).collect();
    if first_line.chars().count() > max || text.lines().nth(1).is_some() {
        out.push('…');
    }
    out
}

/// `HH:MM` from an RFC 3339 timestamp, or the raw value if it is not one.
fn clock(ts: &str) -> &str {
    ts.get(11..16).unwrap_or(ts)
}

pub fn format_plan(plan: &PlanRow) -> String {
    format!(
        "{}  {:<24} {:>8.2} €  [{}]  {} · {}",
        short_id(&plan.id),
        plan.nombre,
        plan.precio,
        plan.segmento,
        plan.datos_moviles,
        plan.minutos_voz
    )
}

pub fn format_contract(contract: &ContractRow) -> String {
    format!(
        "{}  {:<10} {:<20} {:<20} {:>8.2} €  {}",
        short_id(&contract.id),
        contract.estado,
        contract.usuario_nombre.as_deref().unwrap_or("?"),
        contract.plan_nombre.as_deref().unwrap_or("?"),
        contract.precio_mensual,
        contract.created_at.get(..10).unwrap_or(&contract.created_at)
    )
}

pub fn format_conversation(conversation: &ConversationRow) -> String {
    let unread = if conversation.no_leidos > 0 {
        format!(" ({} sin leer)", conversation.no_leidos)
    } else {
        String::new()
    };
    format!(
        "{}  {} · {}{}\n    {}",
        conversation.contratacion_id,
        conversation.usuario_nombre.as_deref().unwrap_or("?"),
        conversation.plan_nombre.as_deref().unwrap_or("?"),
        unread,
        preview(conversation.ultimo_mensaje.as_deref().unwrap_or(""), 60)
    )
}

/// One chat line; the acting user's own messages are labelled `yo`.
pub fn format_message(message: &MessageRow, me: Option<&str>) -> String {
    let who = if me == Some(message.usuario_id.as_str()) {
        "yo".to_string()
    } else {
        short_id(&message.usuario_id).to_string()
    };
    let mark = if message.leido { "✓✓" } else { "✓" };
    format!("[{}] {:<8} {} {}", clock(&message.created_at), who, message.mensaje, mark)
}

// ============================================================================
// HTTP Client
// ============================================================================

struct Api {
    client: reqwest::blocking::Client,
    server: String,
    user: Option<String>,
}

impl Api {
    fn new(server: &str, user: Option<String>) -> anyhow::Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()?;
        Ok(Self {
            client,
            server: server.trim_end_matches('/').to_string(),
            user,
        })
    }

    fn get(&self, path: &str, query: &[(&str, &str)]) -> anyhow::Result<Value> {
        let request = self.client.get(format!("{}{}", self.server, path)).query(query);
        self.send(request)
    }

    fn post(&self, path: &str, body: &Value) -> anyhow::Result<Value> {
        let request = self.client.post(format!("{}{}", self.server, path)).json(body);
        self.send(request)
    }

    fn send(&self, mut request: reqwest::blocking::RequestBuilder) -> anyhow::Result<Value> {
        if let Some(user) = &self.user {
            request = request.header(USER_HEADER, user);
        }
        let resp = request
            .send()
            .with_context(|| format!("connection failed to {}", self.server))?;
        let status = resp.status();
        let body: Value = resp.json().unwrap_or_default();
        if !status.is_success() {
            let msg = body["error"].as_str().unwrap_or("no details");
            bail!("server returned {}: {}", status, msg);
        }
        Ok(body)
    }
}

fn rows<T: for<'de> Deserialize<'de>>(body: &Value, key: &str) -> anyhow::Result<Vec<T>> {
    serde_json::from_value(body[key].clone()).with_context(|| format!("unexpected `{}` payload", key))
}

fn print_json(body: &Value) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(body)?);
    Ok(())
}

// ============================================================================
// Commands
// ============================================================================

fn do_status(api: &Api, json: bool) -> anyhow::Result<()> {
    let body = api.get("/health", &[])?;
    if json {
        return print_json(&body);
    }
    println!("Tienda server: {}", body["status"].as_str().unwrap_or("unknown"));
    println!("Version:       {}", body["version"].as_str().unwrap_or("?"));
    println!("Backend:       {}", body["backend"].as_str().unwrap_or("?"));
    println!("Backend info:  {}", body["backend_info"].as_str().unwrap_or("?"));
    Ok(())
}

fn do_plans(api: &Api, segment: Option<&str>, json: bool) -> anyhow::Result<()> {
    let query: Vec<(&str, &str)> = segment.map(|s| ("segmento", s)).into_iter().collect();
    let body = api.get("/plans", &query)?;
    if json {
        return print_json(&body);
    }
    let plans: Vec<PlanRow> = rows(&body, "plans")?;
    if plans.is_empty() {
        eprintln!("No active plans");
    }
    for plan in &plans {
        println!("{}", format_plan(plan));
    }
    Ok(())
}

fn do_pending(api: &Api, json: bool) -> anyhow::Result<()> {
    let body = api.get("/contracts/pending", &[])?;
    if json {
        return print_json(&body);
    }
    let contracts: Vec<ContractRow> = rows(&body, "contracts")?;
    if contracts.is_empty() {
        eprintln!("No pending contracts");
    }
    for contract in &contracts {
        println!("{}", format_contract(contract));
    }
    Ok(())
}

fn do_decide(api: &Api, id: &str, approve: bool, json: bool) -> anyhow::Result<()> {
    let action = if approve { "approve" } else { "reject" };
    let body = api.post(&format!("/contracts/{}/{}", id, action), &serde_json::json!({}))?;
    if json {
        return print_json(&body);
    }
    println!(
        "Contract {} is now {}",
        short_id(id),
        body["estado"].as_str().unwrap_or("updated")
    );
    Ok(())
}

fn do_conversations(api: &Api, advisor: bool, json: bool) -> anyhow::Result<()> {
    let query: &[(&str, &str)] = if advisor { &[("advisor", "true")] } else { &[] };
    let body = api.get("/conversations", query)?;
    if json {
        return print_json(&body);
    }
    let conversations: Vec<ConversationRow> = rows(&body, "conversations")?;
    if conversations.is_empty() {
        eprintln!("No conversations");
    }
    for conversation in &conversations {
        println!("{}", format_conversation(conversation));
    }
    Ok(())
}

fn do_messages(api: &Api, thread: &str, json: bool) -> anyhow::Result<()> {
    let body = api.get(&format!("/threads/{}/messages", thread), &[])?;
    if json {
        return print_json(&body);
    }
    let messages: Vec<MessageRow> = rows(&body, "messages")?;
    if messages.is_empty() {
        eprintln!("No messages yet");
    }
    for message in &messages {
        println!("{}", format_message(message, api.user.as_deref()));
    }
    Ok(())
}

fn do_send(api: &Api, thread: &str, text: &str, json: bool) -> anyhow::Result<()> {
    if text.trim().is_empty() {
        bail!("message text must not be blank");
    }
    if api.user.is_none() {
        bail!("--user (or TIENDA_USER_ID) is required to send messages");
    }
    let body = api.post(
        &format!("/threads/{}/messages", thread),
        &serde_json::json!({ "mensaje": text }),
    )?;
    if json {
        return print_json(&body);
    }
    let message: MessageRow = serde_json::from_value(body).context("unexpected message payload")?;
    println!("{}", format_message(&message, api.user.as_deref()));
    Ok(())
}

// ============================================================================
// Main
// ============================================================================

fn run(cli: Cli) -> anyhow::Result<()> {
    let api = Api::new(&cli.server, cli.user)?;
    let json = cli.json;

    match cli.command {
        Commands::Status => do_status(&api, json),
        Commands::Plans { segment } => do_plans(&api, segment.as_deref(), json),
        Commands::Pending => do_pending(&api, json),
        Commands::Approve { id } => do_decide(&api, &id, true, json),
        Commands::Reject { id } => do_decide(&api, &id, false, json),
        Commands::Conversations { advisor } => do_conversations(&api, advisor, json),
        Commands::Messages { thread } => do_messages(&api, &thread, json),
        Commands::Send { thread, text } => do_send(&api, &thread, &text, json),
    }
}

fn main() {
    let cli = Cli::parse();
    if let Err(e) = run(cli) {
        eprintln!("tienda-cli: {:#}", e);
        std::process::exit(1);
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    fn message(user: &str, text: &str, read: bool) -> MessageRow {
        MessageRow {
            usuario_id: user.to_string(),
            mensaje: text.to_string(),
            leido: read,
            created_at: "2026-02-23T10:05:00.123456+00:00".to_string(),
        }
    }

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_send_with_global_json() {
        let cli = Cli::try_parse_from([
            "tienda-cli",
            "--server",
            "http://localhost:9000",
            "send",
            "t-1",
            "hola",
            "--json",
        ])
        .unwrap();
        assert!(cli.json);
        assert_eq!(cli.server, "http://localhost:9000");
        match cli.command {
            Commands::Send { thread, text } => {
                assert_eq!(thread, "t-1");
                assert_eq!(text, "hola");
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_format_message_marks_own_and_read() {
        let me = "aaaaaaaa-bbbb-cccc-dddd-eeeeeeeeeeee";
        let own = format_message(&message(me, "hola", true), Some(me));
        assert_eq!(own, "[10:05] yo       hola ✓✓");

        let peer = format_message(&message("deadbeef-cafe-babe-face-feeddeadbeef", "qué tal", false), Some(me));
        assert!(peer.starts_with("[10:05] deadbeef"));
        assert!(peer.ends_with("qué tal ✓"));
    }

    #[test]
    fn test_format_plan_line() {
        let plan = PlanRow {
            id: "7b5c24ab-1234-5678-9abc-def012345678".to_string(),
            nombre: "Premium 5G".to_string(),
            precio: 39.9,
            segmento: "Premium".to_string(),
            datos_moviles: "Ilimitados".to_string(),
            minutos_voz: "Ilimitados".to_string(),
        };
        let line = format_plan(&plan);
        assert!(line.starts_with("7b5c24ab  Premium 5G"));
        assert!(line.contains("39.90 €"));
        assert!(line.contains("[Premium]"));
    }

    #[test]
    fn test_format_contract_handles_missing_names() {
        let contract = ContractRow {
            id: "c0ffee00-1234-5678-9abc-def012345678".to_string(),
            estado: "pendiente".to_string(),
            precio_mensual: 19.0,
            usuario_nombre: None,
            plan_nombre: Some("Básico".to_string()),
            created_at: "2026-02-23T10:00:00Z".to_string(),
        };
        let line = format_contract(&contract);
        assert!(line.contains("pendiente"));
        assert!(line.contains("Básico"));
        assert!(line.ends_with("2026-02-23"));
    }

    #[test]
    fn test_format_conversation_unread_and_preview() {
        let conversation = ConversationRow {
            contratacion_id: "t-1".to_string(),
            usuario_nombre: Some("Ana".to_string()),
            plan_nombre: Some("Medio".to_string()),
            ultimo_mensaje: Some("línea uno\nlínea dos".to_string()),
            no_leidos: 2,
        };
        let text = format_conversation(&conversation);
        assert!(text.contains("(2 sin leer)"));
        assert!(text.ends_with("línea uno…"));
    }

    #[test]
    fn test_preview_and_clock_edge_cases() {
        assert_eq!(preview("", 10), "");
        assert_eq!(preview("abcdef", 3), "abc…");
        assert_eq!(clock("bad"), "bad");
        assert_eq!(short_id("abc"), "abc");
    }

    #[test]
    fn test_rows_reports_bad_payload() {
        let body = serde_json::json!({ "plans": [{ "id": 1 }] });
        assert!(rows::<PlanRow>(&body, "plans").is_err());
        let empty = serde_json::json!({ "plans": [] });
        assert!(rows::<PlanRow>(&empty, "plans").unwrap().is_empty());
    }
}
