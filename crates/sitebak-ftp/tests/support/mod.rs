//! Minimal plain-FTP server over a local directory, enough for the
//! download client: login, PWD/CWD, PASV/EPSV, NLST, SIZE, RETR, NOOP, QUIT.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use secrecy::SecretString;
use sitebak_ftp::{FtpConnectionConfig, FtpSecurityMode};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::{TcpListener, TcpStream};

pub struct FakeFtpServer {
    pub addr: SocketAddr,
    commands: Arc<Mutex<Vec<String>>>,
}

#[derive(Clone)]
struct Settings {
    root: PathBuf,
    /// Added to every SIZE reply, to simulate a truncated transfer.
    size_skew: u64,
    /// RETRs still to fail with a reset data connection and a 426 reply.
    failing_retrs: Arc<AtomicU32>,
}

impl FakeFtpServer {
    pub async fn start(root: &Path) -> Self {
        Self::start_with_skew(root, 0).await
    }

    pub async fn start_with_skew(root: &Path, size_skew: u64) -> Self {
        Self::spawn(root, size_skew, 0).await
    }

    /// The first `failures` RETRs reset the data connection and answer 426.
    pub async fn start_flaky(root: &Path, failures: u32) -> Self {
        Self::spawn(root, 0, failures).await
    }

    async fn spawn(root: &Path, size_skew: u64, failures: u32) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let commands = Arc::new(Mutex::new(Vec::new()));
        let settings = Settings {
            root: root.to_path_buf(),
            size_skew,
            failing_retrs: Arc::new(AtomicU32::new(failures)),
        };

        let log = commands.clone();
        tokio::spawn(async move {
            while let Ok((sock, _)) = listener.accept().await {
                tokio::spawn(serve(sock, settings.clone(), log.clone()));
            }
        });

        Self { addr, commands }
    }

    pub fn commands(&self) -> Vec<String> {
        self.commands.lock().unwrap().clone()
    }

    pub fn saw(&self, verb: &str) -> bool {
        self.commands().iter().any(|c| c.split(' ').next() == Some(verb))
    }

    /// Plain-FTP client config pointing at this server, one attempt each.
    pub fn config(&self, local_base: &Path) -> FtpConnectionConfig {
        let mut config =
            FtpConnectionConfig::new("127.0.0.1", "backup", SecretString::new("pw".into()));
        config.port = self.addr.port();
        config.security = FtpSecurityMode::None;
        config.host_base_path = "/".into();
        config.local_base_path = local_base.to_path_buf();
        config.keepalive_interval_sec = 0;
        config.max_retries = 1;
        config.connect_attempts = 1;
        config.retry_delay_sec = 0;
        config
    }
}

async fn reply(w: &mut OwnedWriteHalf, line: &str) {
    w.write_all(format!("{}\r\n", line).as_bytes()).await.unwrap();
}

/// Resolve `arg` against the virtual cwd into a normalised absolute path.
fn resolve(cwd: &str, arg: &str) -> String {
    let joined = if arg.starts_with('/') {
        arg.to_string()
    } else {
        format!("{}/{}", cwd.trim_end_matches('/'), arg)
    };
    let mut parts: Vec<&str> = Vec::new();
    for part in joined.split('/') {
        match part {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            p => parts.push(p),
        }
    }
    format!("/{}", parts.join("/"))
}

fn on_disk(root: &Path, virt: &str) -> PathBuf {
    root.join(virt.trim_start_matches('/'))
}

async fn serve(sock: TcpStream, settings: Settings, log: Arc<Mutex<Vec<String>>>) {
    let (rd, mut w) = sock.into_split();
    let mut lines = BufReader::new(rd).lines();
    let mut cwd = "/".to_string();
    let mut pasv: Option<TcpListener> = None;

    reply(&mut w, "220 fake ftp ready").await;

    while let Ok(Some(line)) = lines.next_line().await {
        log.lock().unwrap().push(line.clone());
        let (verb, arg) = match line.split_once(' ') {
            Some((v, a)) => (v.to_uppercase(), a.to_string()),
            None => (line.to_uppercase(), String::new()),
        };

        match verb.as_str() {
            "USER" => reply(&mut w, "331 Please specify the password.").await,
            "PASS" => reply(&mut w, "230 Login successful.").await,
            "TYPE" => reply(&mut w, "200 Switching to Binary mode.").await,
            "NOOP" => reply(&mut w, "200 NOOP ok.").await,
            "PWD" => reply(&mut w, &format!("257 \"{}\" is the current directory", cwd)).await,
            "CWD" => {
                let target = resolve(&cwd, &arg);
                if on_disk(&settings.root, &target).is_dir() {
                    cwd = target;
                    reply(&mut w, "250 Directory successfully changed.").await;
                } else {
                    reply(&mut w, "550 Failed to change directory.").await;
                }
            }
            "PASV" | "EPSV" => {
                let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
                let port = listener.local_addr().unwrap().port();
                pasv = Some(listener);
                if verb == "PASV" {
                    reply(
                        &mut w,
                        &format!(
                            "227 Entering Passive Mode (127,0,0,1,{},{}).",
                            port / 256,
                            port % 256
                        ),
                    )
                    .await;
                } else {
                    reply(&mut w, &format!("229 Entering Extended Passive Mode (|||{}|)", port))
                        .await;
                }
            }
            "SIZE" => {
                let path = on_disk(&settings.root, &resolve(&cwd, &arg));
                match std::fs::metadata(&path) {
                    Ok(meta) if meta.is_file() => {
                        reply(&mut w, &format!("213 {}", meta.len() + settings.size_skew)).await
                    }
                    _ => reply(&mut w, "550 Could not get file size.").await,
                }
            }
            "NLST" => {
                let dir = if arg.is_empty() {
                    cwd.clone()
                } else {
                    resolve(&cwd, &arg)
                };
                let mut names: Vec<String> = match std::fs::read_dir(on_disk(&settings.root, &dir)) {
                    Ok(rd) => rd
                        .filter_map(Result::ok)
                        .map(|e| e.file_name().to_string_lossy().into_owned())
                        .collect(),
                    Err(_) => {
                        reply(&mut w, "550 No such directory.").await;
                        continue;
                    }
                };
                names.sort();
                let body: String = names.iter().map(|n| format!("{}\r\n", n)).collect();
                send_data(&mut w, pasv.take(), body.as_bytes()).await;
            }
            "RETR" => {
                let path = on_disk(&settings.root, &resolve(&cwd, &arg));
                match std::fs::read(&path) {
                    Ok(_) if path.is_file() && take_failure(&settings.failing_retrs) => {
                        reset_data(&mut w, pasv.take()).await
                    }
                    Ok(bytes) if path.is_file() => send_data(&mut w, pasv.take(), &bytes).await,
                    _ => {
                        pasv = None;
                        reply(&mut w, "550 Failed to open file.").await;
                    }
                }
            }
            "QUIT" => {
                reply(&mut w, "221 Goodbye.").await;
                return;
            }
            _ => reply(&mut w, "502 Command not implemented.").await,
        }
    }
}

async fn send_data(w: &mut OwnedWriteHalf, listener: Option<TcpListener>, bytes: &[u8]) {
    let Some(listener) = listener else {
        reply(w, "425 Use PASV first.").await;
        return;
    };
    reply(w, "150 Opening BINARY mode data connection.").await;
    let (mut data, _) = listener.accept().await.unwrap();
    data.write_all(bytes).await.unwrap();
    data.shutdown().await.unwrap();
    drop(data);
    reply(w, "226 Transfer complete.").await;
}

fn take_failure(remaining: &AtomicU32) -> bool {
    remaining
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

/// Accept the data connection, abort it with a RST, then report 426.
#[allow(deprecated)]
async fn reset_data(w: &mut OwnedWriteHalf, listener: Option<TcpListener>) {
    let Some(listener) = listener else {
        reply(w, "425 Use PASV first.").await;
        return;
    };
    reply(w, "150 Opening BINARY mode data connection.").await;
    let (data, _) = listener.accept().await.unwrap();
    data.set_linger(Some(Duration::ZERO)).unwrap();
    drop(data);
    reply(w, "426 Connection closed; transfer aborted.").await;
}

/// Write `content` at `rel` under `root`, creating parents.
pub fn put(root: &Path, rel: &str, content: &[u8]) {
    let path = root.join(rel);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, content).unwrap();
}
