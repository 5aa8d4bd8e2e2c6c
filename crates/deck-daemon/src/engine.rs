//! Client for the playback engine's control protocol.
//!
//! The engine answers each command with `key: value` lines followed by `OK`,
//! or a single `ACK ...` line on failure; multi-command batches go through a
//! command list.  Every operation carries the same recovery contract: on
//! failure, drop the connection, reconnect once, retry the command once.  A
//! second failure is the caller's problem.

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, info, warn};

const RESPONSE_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("cannot reach engine at {host}: {source}")]
    Connection {
        host: String,
        #[source]
        source: std::io::Error,
    },
    #[error("engine rejected {op}: {source}")]
    Playback {
        op: &'static str,
        #[source]
        source: std::io::Error,
    },
}

/// The engine operations the control loop depends on.
#[async_trait]
pub trait Playback {
    /// Stop playback, clear the queue, enqueue every URL in order.
    async fn load_playlist(&mut self, urls: &[String]) -> Result<(), EngineError>;
    /// Stop, then play the queue entry at `index`.
    async fn play_index(&mut self, index: usize) -> Result<(), EngineError>;
    /// Title of whatever is playing, when the engine knows one.
    async fn now_playing(&mut self) -> Result<Option<String>, EngineError>;
}

pub struct MpdClient {
    host: String,
    port: u16,
    password: String,
    stream: Option<BufReader<TcpStream>>,
}

impl MpdClient {
    pub fn new(host: &str, port: u16, password: &str) -> Self {
        Self {
            host: host.to_string(),
            port,
            password: password.to_string(),
            stream: None,
        }
    }

    fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Open the control connection: TCP, greeting, optional password.
    pub async fn connect(&mut self) -> Result<(), EngineError> {
        self.stream = None;
        match self.open().await {
            Ok(stream) => {
                self.stream = Some(stream);
                info!("engine: connected to {}", self.addr());
                Ok(())
            }
            Err(e) => Err(EngineError::Connection {
                host: self.addr(),
                source: e,
            }),
        }
    }

    async fn open(&self) -> std::io::Result<BufReader<TcpStream>> {
        let stream = TcpStream::connect(self.addr()).await?;
        let mut stream = BufReader::new(stream);

        let mut greeting = String::new();
        timeout(RESPONSE_TIMEOUT, stream.read_line(&mut greeting))
            .await
            .map_err(|_| timeout_err("greeting"))??;
        if !greeting.starts_with("OK MPD") {
            return Err(protocol_err(format!(
                "unexpected greeting: {:?}",
                greeting.trim()
            )));
        }
        debug!("engine: greeting {}", greeting.trim());

        if !self.password.is_empty() {
            let line = format!("password {}\n", quote(&self.password));
            stream.get_mut().write_all(line.as_bytes()).await?;
            read_response(&mut stream).await?;
        }
        Ok(stream)
    }

    /// Send one batch and read its response.
    async fn exec(&mut self, commands: &[String]) -> std::io::Result<Vec<String>> {
        let stream = self.stream.as_mut().ok_or_else(|| {
            std::io::Error::new(std::io::ErrorKind::NotConnected, "not connected")
        })?;

        let mut batch = String::new();
        if commands.len() > 1 {
            batch.push_str("command_list_begin\n");
        }
        for command in commands {
            batch.push_str(command);
            batch.push('\n');
        }
        if commands.len() > 1 {
            batch.push_str("command_list_end\n");
        }

        debug!("engine: send {:?}", commands);
        stream.get_mut().write_all(batch.as_bytes()).await?;
        read_response(stream).await
    }

    /// Run `commands` under the recovery contract: a failure drops the
    /// connection and earns exactly one reconnect plus one retry.
    async fn exec_with_retry(
        &mut self,
        op: &'static str,
        commands: &[String],
    ) -> Result<Vec<String>, EngineError> {
        match self.exec(commands).await {
            Ok(payload) => Ok(payload),
            Err(first) => {
                warn!("engine: {} failed ({}), reconnecting", op, first);
                self.stream = None;
                self.connect().await?;
                self.exec(commands)
                    .await
                    .map_err(|e| EngineError::Playback { op, source: e })
            }
        }
    }
}

#[async_trait]
impl Playback for MpdClient {
    async fn load_playlist(&mut self, urls: &[String]) -> Result<(), EngineError> {
        let mut commands = vec!["stop".to_string(), "clear".to_string()];
        for url in urls {
            commands.push(format!("add {}", quote(url)));
        }
        self.exec_with_retry("load_playlist", &commands).await?;
        Ok(())
    }

    async fn play_index(&mut self, index: usize) -> Result<(), EngineError> {
        let commands = vec!["stop".to_string(), format!("play {}", index)];
        self.exec_with_retry("play_index", &commands).await?;
        Ok(())
    }

    async fn now_playing(&mut self) -> Result<Option<String>, EngineError> {
        let payload = self
            .exec_with_retry("now_playing", &["currentsong".to_string()])
            .await?;
        Ok(payload
            .iter()
            .find_map(|line| line.strip_prefix("Title: "))
            .map(|title| title.trim().to_string()))
    }
}

/// Read lines until the terminating `OK`, collecting the payload.  An `ACK`
/// line becomes an error carrying the engine's message.
async fn read_response(stream: &mut BufReader<TcpStream>) -> std::io::Result<Vec<String>> {
    let mut payload = Vec::new();
    loop {
        let mut line = String::new();
        let n = timeout(RESPONSE_TIMEOUT, stream.read_line(&mut line))
            .await
            .map_err(|_| timeout_err("response"))??;
        if n == 0 {
            return Err(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "engine closed the connection",
            ));
        }
        let line = line.trim_end();
        if line == "OK" {
            return Ok(payload);
        }
        if line.starts_with("ACK") {
            return Err(protocol_err(line.to_string()));
        }
        payload.push(line.to_string());
    }
}

/// Quote an argument the way the engine's protocol expects.
fn quote(arg: &str) -> String {
    format!("\"{}\"", arg.replace('\\', "\\\\").replace('"', "\\\""))
}

fn timeout_err(what: &str) -> std::io::Error {
    std::io::Error::new(
        std::io::ErrorKind::TimedOut,
        format!("engine {} timed out", what),
    )
}

fn protocol_err(message: String) -> std::io::Error {
    std::io::Error::new(std::io::ErrorKind::InvalidData, message)
}
