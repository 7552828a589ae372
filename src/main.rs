use std::process::ExitCode;
use std::sync::Arc;

use futures::StreamExt;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

use attache::{Agent, AppConfig};

const USAGE: &str = "usage: attache [serve | demo | test]\n\
  (no mode)  interactive session\n\
  serve      run the HTTP server\n\
  demo       run a scripted tour of the assistant\n\
  test       verify configuration and tool wiring";

#[tokio::main]
async fn main() -> ExitCode {
    let mode = std::env::args().nth(1).unwrap_or_default();

    let cfg = match load_config() {
        Ok(cfg) => cfg,
        Err(err) => {
            eprintln!("configuration error: {err}");
            return ExitCode::FAILURE;
        }
    };

    if let Err(err) = attache::telemetry::init(&cfg.logging) {
        eprintln!("failed to initialize logging: {err}");
        return ExitCode::FAILURE;
    }

    let outcome = match mode.as_str() {
        "serve" => serve(cfg).await,
        "demo" => demo(cfg).await,
        "test" => self_test(cfg).await,
        "" => interactive(cfg).await,
        other => {
            eprintln!("unknown mode `{other}`\n{USAGE}");
            return ExitCode::from(2);
        }
    };

    match outcome {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err}");
            ExitCode::FAILURE
        }
    }
}

/// `ATTACHE_CONFIG` names the file; otherwise `attache.toml` is used when
/// present, with environment overrides applied either way.
fn load_config() -> attache::Result<AppConfig> {
    if let Ok(path) = std::env::var("ATTACHE_CONFIG") {
        return AppConfig::from_env_or_file(path);
    }
    if std::path::Path::new("attache.toml").exists() {
        return AppConfig::from_env_or_file("attache.toml");
    }
    AppConfig::from_env()
}

#[cfg(feature = "server")]
async fn serve(cfg: AppConfig) -> attache::Result<()> {
    attache::server::serve(cfg).await
}

#[cfg(not(feature = "server"))]
async fn serve(_cfg: AppConfig) -> attache::Result<()> {
    Err(attache::AttacheError::Configuration(
        "this build was compiled without the `server` feature".into(),
    ))
}

async fn interactive(cfg: AppConfig) -> attache::Result<()> {
    let streaming = cfg.model.streaming;
    let agent = Arc::new(Agent::from_config(&cfg).await?);
    let caps = agent.capabilities();
    println!(
        "{} ready ({} via {}). Type `help` for commands.",
        caps.name, caps.role, caps.provider
    );

    let stdin = BufReader::new(tokio::io::stdin());
    let mut lines = stdin.lines();
    let mut stdout = tokio::io::stdout();

    loop {
        stdout.write_all(b"> ").await?;
        stdout.flush().await?;
        let Some(line) = lines.next_line().await? else {
            break;
        };
        let input = line.trim();

        match input {
            "" => continue,
            "quit" | "exit" => break,
            "help" => {
                println!("commands: help, capabilities, quit/exit; anything else goes to the assistant");
            }
            "capabilities" => {
                println!("{}", serde_json::to_string_pretty(&agent.capabilities())?);
            }
            _ => {
                if streaming {
                    let mut stream = Arc::clone(&agent).invoke_streaming(input);
                    while let Some(chunk) = stream.next().await {
                        match chunk {
                            Ok(text) => {
                                stdout.write_all(text.as_bytes()).await?;
                                stdout.flush().await?;
                            }
                            Err(err) => {
                                eprintln!("\nrequest failed: {err}");
                                break;
                            }
                        }
                    }
                    println!();
                } else {
                    match agent.invoke(input).await {
                        Ok(reply) => println!("{}", reply.text),
                        Err(err) => eprintln!("request failed: {err}"),
                    }
                }
            }
        }
    }

    println!("goodbye");
    Ok(())
}

/// Run a fixed set of representative prompts against the configured model.
async fn demo(cfg: AppConfig) -> attache::Result<()> {
    let agent = Agent::from_config(&cfg).await?;
    let prompts = [
        "What time is it right now?",
        "Schedule a 45-minute planning meeting with ana@example.com tomorrow at 14:00.",
        "Prioritize these tasks: reply to the board, book travel, draft the quarterly update.",
        "Remind me on Friday to file the expense report.",
        "Give me a daily briefing on hiring and the product launch.",
    ];

    for prompt in prompts {
        println!("\n>>> {prompt}");
        let reply = agent.invoke(prompt).await?;
        println!("{}", reply.text);
        if reply.truncated {
            println!("(reply truncated at the tool-call limit)");
        }
    }
    Ok(())
}

/// Verify wiring without calling a model: configuration validity, backend
/// construction, and tool registration.
async fn self_test(cfg: AppConfig) -> attache::Result<()> {
    cfg.validate()?;
    println!("configuration: ok");

    let agent = Agent::from_config(&cfg).await?;
    let caps = agent.capabilities();
    println!("backend: {} ({})", caps.provider, caps.model.as_deref().unwrap_or("default model"));
    println!("tools ({}): {}", caps.tools.len(), caps.tools.join(", "));
    println!("max tool calls per request: {}", caps.max_tool_calls);
    println!("self-test passed");
    Ok(())
}
