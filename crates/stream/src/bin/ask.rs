use anyhow::Result;
use clap::Parser;
use std::io::Write;
use std::time::Duration;
use stream::{
    CancelSignal, ChatMessage, ChatStreamRequest, ConsumerConfig, RetrievalOptions, StreamClient,
    StreamEvent, StreamOutcome, StreamUpdate,
};
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

/// Ask the assistant a question and print the answer as it streams.
#[derive(Parser, Debug)]
#[command(name = "ask")]
struct Args {
    /// The question
    question: String,

    #[arg(long, default_value = "http://localhost:3000")]
    server: String,

    #[arg(long)]
    model: Option<String>,

    /// Request retrieval explicitly (honoured in manual activation mode)
    #[arg(long)]
    retrieval: bool,

    #[arg(long, default_value_t = 30)]
    idle_timeout_secs: u64,

    #[arg(long, default_value_t = 300)]
    max_duration_secs: u64,

    /// Print a progress line after every token
    #[arg(long)]
    progress: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let client = StreamClient::with_config(
        args.server.clone(),
        ConsumerConfig {
            idle_timeout: Duration::from_secs(args.idle_timeout_secs),
            max_duration: Duration::from_secs(args.max_duration_secs),
        },
    );

    let request = ChatStreamRequest {
        messages: vec![ChatMessage::user(args.question.clone())],
        model: args.model.clone(),
        options: Default::default(),
        retrieval: Some(RetrievalOptions {
            enabled: args.retrieval,
            ..Default::default()
        }),
    };

    let cancel = CancelSignal::new();
    let ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            ctrl_c.cancel();
        }
    });

    let (tx, mut rx) = mpsc::channel(256);
    let show_progress = args.progress;
    let printer = tokio::spawn(async move {
        let mut stdout = std::io::stdout();
        while let Some(update) = rx.recv().await {
            match update {
                StreamUpdate::Event(StreamEvent::Sources { sources, .. }) => {
                    for source in &sources {
                        eprintln!("[source] {} ({:.2})", source.key(), source.score);
                    }
                }
                StreamUpdate::Event(StreamEvent::Token { content }) => {
                    print!("{}", content);
                    let _ = stdout.flush();
                }
                StreamUpdate::Event(StreamEvent::Error { message }) => {
                    eprintln!("\n[error] {}", message);
                }
                StreamUpdate::Event(StreamEvent::Done { .. }) => {}
                StreamUpdate::Progress(progress) if show_progress => {
                    eprintln!(
                        "[{} tokens, {} ms, {:.1} tok/s]",
                        progress.token_count, progress.elapsed_ms, progress.tokens_per_second
                    );
                }
                StreamUpdate::Progress(_) => {}
            }
        }
    });

    let outcome = client.stream_chat(&request, &cancel, Some(tx)).await;
    let _ = printer.await;
    println!();

    match outcome {
        Ok(StreamOutcome::Completed { metadata, .. }) => {
            eprintln!(
                "Done: {} tokens in {} ms ({:.1} tok/s)",
                metadata.token_count, metadata.duration_ms, metadata.tokens_per_second
            );
        }
        Ok(StreamOutcome::Interrupted { metadata, .. }) => {
            eprintln!("Connection lost after {} tokens; answer is partial", metadata.token_count);
        }
        Ok(StreamOutcome::Cancelled { metadata, .. }) => {
            eprintln!("Cancelled after {} tokens", metadata.token_count);
        }
        Err(e) => {
            if let Some(partial) = e.partial_text() {
                eprintln!("Partial answer ({} chars) kept", partial.len());
            }
            return Err(e.into());
        }
    }

    Ok(())
}
