use std::io::Write;
use std::sync::Arc;

use chatstream_rs::auth::{CredentialProvider, CredentialStore, NoCredentials, StreamAccess};
use chatstream_rs::config::{load_config, ClientConfig, ConfigError};
use chatstream_rs::observability::init_tracing;
use chatstream_rs::protocol::StreamRequest;
use chatstream_rs::stream::StreamEvent;
use chatstream_rs::ChatClient;
use clap::Parser;
use futures_util::StreamExt;

const DEFAULT_CONFIG_PATH: &str = "config.yaml";
const CONFIG_PATH_ENV: &str = "CHATSTREAM_CONFIG";
const EXIT_INTERRUPTED: i32 = 130;

#[derive(Debug, Parser)]
#[command(name = "chatstream")]
#[command(about = "Stream a chat reply from the backend to stdout")]
struct Cli {
    /// Use the anonymous endpoint
    #[arg(long)]
    public: bool,

    /// Continue an existing conversation
    #[arg(long = "conversation", value_name = "ID")]
    conversation_id: Option<i64>,

    /// Turn retrieval augmentation on
    #[arg(long, overrides_with = "no_rag")]
    rag: bool,

    /// Turn retrieval augmentation off
    #[arg(long, overrides_with = "rag")]
    no_rag: bool,

    /// Sampling temperature
    #[arg(long)]
    temperature: Option<f32>,

    /// Response length limit
    #[arg(long)]
    max_tokens: Option<u32>,

    /// Message to send; words are joined with spaces
    #[arg(required = true, num_args = 1..)]
    message: Vec<String>,
}

impl Cli {
    fn access(&self) -> StreamAccess {
        if self.public {
            StreamAccess::Public
        } else {
            StreamAccess::Authenticated
        }
    }

    fn use_rag(&self) -> Option<bool> {
        match (self.rag, self.no_rag) {
            (true, _) => Some(true),
            (_, true) => Some(false),
            _ => None,
        }
    }

    fn into_request(self) -> StreamRequest {
        let use_rag = self.use_rag();
        let mut request = StreamRequest::new(self.message.join(" "));
        request.conversation_id = self.conversation_id;
        request.use_rag = use_rag;
        request.temperature = self.temperature;
        request.max_tokens = self.max_tokens;
        request
    }
}

fn load_client_config() -> ClientConfig {
    let explicit = std::env::var(CONFIG_PATH_ENV).ok();
    let path = explicit.as_deref().unwrap_or(DEFAULT_CONFIG_PATH);
    match load_config(path) {
        Ok(config) => config,
        Err(ConfigError::Io(err))
            if explicit.is_none() && err.kind() == std::io::ErrorKind::NotFound =>
        {
            ClientConfig::default()
        }
        Err(e) => {
            eprintln!("Failed to load configuration from '{path}': {e}");
            eprintln!("Please copy 'config.example.yaml' to 'config.yaml' and modify as needed.");
            std::process::exit(1);
        }
    }
}

fn credentials_from_env(config: &ClientConfig) -> Arc<dyn CredentialProvider> {
    let Ok(token) = std::env::var(&config.auth.token_env) else {
        return Arc::new(NoCredentials);
    };
    match CredentialStore::with_token(&token) {
        Ok(store) => Arc::new(store),
        Err(e) => {
            eprintln!("Ignoring {}: {e}", config.auth.token_env);
            Arc::new(NoCredentials)
        }
    }
}

fn main() {
    let cli = Cli::parse();

    let config = load_client_config();
    init_tracing(&config.features.log_level, config.features.log_format);

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_io()
        .enable_time()
        .build()
        .unwrap_or_else(|e| {
            eprintln!("Failed to initialize Tokio runtime: {e}");
            std::process::exit(1);
        });

    let code = runtime.block_on(run(config, cli));
    std::process::exit(code);
}

async fn run(config: ClientConfig, cli: Cli) -> i32 {
    let credentials = credentials_from_env(&config);
    let client = match ChatClient::from_config(&config, credentials) {
        Ok(client) => client,
        Err(e) => {
            eprintln!("{e}");
            return 1;
        }
    };

    let access = cli.access();
    let mut stream = client.start_stream(access, cli.into_request());
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let mut stdout = std::io::stdout();

    loop {
        let flow = tokio::select! {
            _ = &mut ctrl_c => {
                eprintln!();
                eprintln!("[cancelled]");
                Flow::Exit(EXIT_INTERRUPTED)
            }
            event = stream.next() => render_event(event, &mut stdout, &config.auth.token_env),
        };
        if let Flow::Exit(code) = flow {
            stream.cancel();
            return code;
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
enum Flow {
    Continue,
    Exit(i32),
}

/// Write one stream event to `out`. A failed write ends the run.
fn render_event(event: Option<StreamEvent>, out: &mut impl Write, token_env: &str) -> Flow {
    match event {
        Some(StreamEvent::Token(text)) => {
            match out.write_all(text.as_bytes()).and_then(|()| out.flush()) {
                Ok(()) => Flow::Continue,
                Err(e) => {
                    eprintln!("error: cannot write output: {e}");
                    Flow::Exit(1)
                }
            }
        }
        Some(StreamEvent::Complete { conversation_id }) => {
            let _ = writeln!(out);
            if let Some(id) = conversation_id {
                eprintln!("[conversation {id}]");
            }
            Flow::Exit(0)
        }
        Some(StreamEvent::Error(err)) => {
            let _ = writeln!(out);
            eprintln!("error: {}", err.user_message());
            if err.is_unauthorized() {
                eprintln!("Sign in again and export the session token as {token_env}.");
            }
            Flow::Exit(1)
        }
        None => Flow::Exit(EXIT_INTERRUPTED),
    }
}
