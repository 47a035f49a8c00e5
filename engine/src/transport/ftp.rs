//! FTP transport built on suppaftp.

use std::fs::File;
use std::io::{self, BufReader};
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::path::Path;
use std::time::Duration;
use suppaftp::types::FileType;
use suppaftp::{FtpError, FtpStream};
use tracing::{debug, info, warn};

use super::{RemoteSession, Transport, TransportError};
use crate::config::DeployConfig;

const DEFAULT_PORT: u16 = 21;

/// Plain FTP.
#[derive(Debug, Clone, Copy, Default)]
pub struct FtpTransport;

impl Transport for FtpTransport {
    fn connect(&self, config: &DeployConfig) -> Result<Box<dyn RemoteSession>, TransportError> {
        let addr = resolve(&config.host)?;
        info!(host = %config.host, %addr, "Connecting");

        let stream = FtpStream::connect_timeout(addr, config.timeout).map_err(|e| match e {
            FtpError::ConnectionError(io) => match TransportError::from_io(io) {
                TransportError::Io(io) => TransportError::Connect(io.to_string()),
                other => other,
            },
            other => TransportError::Connect(other.to_string()),
        })?;
        apply_timeout(&stream, config.timeout)?;
        let timeout = config.timeout;
        let mut stream = stream.passive_stream_builder(move |addr| {
            data_connection(addr, timeout).map_err(FtpError::ConnectionError)
        });

        stream
            .login(config.user.as_str(), config.password.as_str())
            .map_err(|e| match e {
                FtpError::ConnectionError(io) => TransportError::from_io(io),
                other => TransportError::Auth(other.to_string()),
            })?;
        stream.transfer_type(FileType::Binary).map_err(map_ftp)?;

        let base = enter_remote_folder(&mut stream, &config.remote_folder)?;
        debug!(base = %base, "Remote folder ready");

        Ok(Box::new(FtpSession { stream, base }))
    }
}

/// Session over one control connection, parked in the remote folder.
pub struct FtpSession {
    stream: FtpStream,
    base: String,
}

impl FtpSession {
    fn return_to_base(&mut self) -> Result<(), TransportError> {
        self.stream.cwd(self.base.as_str()).map_err(map_ftp)
    }
}

impl RemoteSession for FtpSession {
    fn mkdir(&mut self, path: &str) -> Result<(), TransportError> {
        match self.stream.mkdir(path) {
            Ok(()) => Ok(()),
            Err(err) => {
                // MKD fails on an existing directory; CWD tells the two apart.
                if self.stream.cwd(path).is_ok() {
                    self.return_to_base()?;
                    Ok(())
                } else {
                    Err(map_ftp(err))
                }
            }
        }
    }

    fn upload(&mut self, local: &Path, remote: &str) -> Result<u64, TransportError> {
        let file = File::open(local).map_err(TransportError::Io)?;
        let mut reader = BufReader::new(file);
        self.stream.put_file(remote, &mut reader).map_err(map_ftp)
    }

    fn delete(&mut self, path: &str) -> Result<(), TransportError> {
        self.stream.rm(path).map_err(map_ftp)
    }

    fn rename(&mut self, from: &str, to: &str) -> Result<(), TransportError> {
        self.stream.rename(from, to).map_err(map_ftp)
    }

    fn close(&mut self) -> Result<(), TransportError> {
        self.stream.quit().map_err(map_ftp)
    }
}

fn map_ftp(err: FtpError) -> TransportError {
    match err {
        FtpError::ConnectionError(io) => TransportError::from_io(io),
        other => TransportError::Protocol(other.to_string()),
    }
}

fn apply_timeout(stream: &FtpStream, timeout: Duration) -> Result<(), TransportError> {
    let socket = stream.get_ref();
    socket
        .set_read_timeout(Some(timeout))
        .map_err(TransportError::from_io)?;
    socket
        .set_write_timeout(Some(timeout))
        .map_err(TransportError::from_io)
}

/// Open a passive data connection under the same timeout as the control
/// connection, so a stalled transfer fails instead of blocking.
fn data_connection<A: ToSocketAddrs>(addr: A, timeout: Duration) -> io::Result<TcpStream> {
    let addr = addr
        .to_socket_addrs()?
        .next()
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "no data address"))?;
    let stream = TcpStream::connect_timeout(&addr, timeout)?;
    stream.set_read_timeout(Some(timeout))?;
    stream.set_write_timeout(Some(timeout))?;
    Ok(stream)
}

/// Resolve "host" or "host:port" to a socket address.
fn resolve(host: &str) -> Result<SocketAddr, TransportError> {
    let (name, port) = split_host_port(host)?;
    (name, port)
        .to_socket_addrs()
        .map_err(|e| TransportError::Connect(format!("cannot resolve {}: {}", name, e)))?
        .next()
        .ok_or_else(|| TransportError::Connect(format!("no address for {}", name)))
}

fn split_host_port(host: &str) -> Result<(&str, u16), TransportError> {
    match host.rsplit_once(':') {
        Some((name, port)) if !name.contains(':') => {
            let port = port
                .parse()
                .map_err(|_| TransportError::Connect(format!("invalid port in {}", host)))?;
            Ok((name, port))
        }
        _ => Ok((host, DEFAULT_PORT)),
    }
}

/// Walk into `remote_folder` from the server root, creating missing levels,
/// and return the absolute working directory.
fn enter_remote_folder(stream: &mut FtpStream, remote_folder: &str) -> Result<String, TransportError> {
    if let Err(e) = stream.cwd("/") {
        warn!(error = %e, "Could not change to server root; using login directory");
    }

    for part in remote_folder.split('/').filter(|p| !p.is_empty()) {
        if stream.cwd(part).is_ok() {
            continue;
        }
        stream.mkdir(part).map_err(|e| {
            TransportError::Protocol(format!("cannot create remote folder {}: {}", part, e))
        })?;
        stream.cwd(part).map_err(map_ftp)?;
    }

    stream.pwd().map_err(map_ftp)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checksums::ChecksumAlgorithm;
    use std::io::{BufRead, Write};
    use std::net::TcpListener;
    use std::path::PathBuf;
    use std::sync::mpsc;
    use std::thread;

    /// FTP server that completes the login handshake, accepts the STOR data
    /// connection and then never reads from it.
    fn stalling_server() -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").expect("Failed to bind listener");
        let addr = listener.local_addr().expect("Failed to read listener address");

        thread::spawn(move || {
            let Ok((control, _)) = listener.accept() else {
                return;
            };
            let mut reader = io::BufReader::new(control.try_clone().expect("Failed to clone socket"));
            let mut writer = control;
            let mut data_listener: Option<TcpListener> = None;
            let mut held = Vec::new();

            let _ = writer.write_all(b"220 ready\r\n");
            let mut line = String::new();
            while reader.read_line(&mut line).map(|n| n > 0).unwrap_or(false) {
                let command = line.split_whitespace().next().unwrap_or("").to_uppercase();
                let reply = match command.as_str() {
                    "USER" => "331 password required".to_string(),
                    "PASS" => "230 logged in".to_string(),
                    "TYPE" => "200 type set".to_string(),
                    "CWD" => "250 ok".to_string(),
                    "PWD" => "257 \"/www\" is current".to_string(),
                    "PASV" => {
                        let data = TcpListener::bind("127.0.0.1:0").expect("Failed to bind data");
                        let port = data.local_addr().expect("Failed to read data address").port();
                        data_listener = Some(data);
                        format!("227 Entering Passive Mode (127,0,0,1,{},{})", port / 256, port % 256)
                    }
                    "STOR" => {
                        let _ = writer.write_all(b"150 opening data connection\r\n");
                        if let Some(data) = &data_listener {
                            if let Ok((socket, _)) = data.accept() {
                                held.push(socket);
                            }
                        }
                        line.clear();
                        continue;
                    }
                    "QUIT" => "221 bye".to_string(),
                    _ => "502 not implemented".to_string(),
                };
                let _ = writer.write_all(format!("{}\r\n", reply).as_bytes());
                line.clear();
            }
        });

        addr
    }

    #[test]
    fn test_stalled_upload_times_out() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let local = temp_dir.path().join("big.bin");
        std::fs::write(&local, vec![0u8; 64 * 1024 * 1024]).expect("Failed to write file");

        let config = DeployConfig {
            host: stalling_server().to_string(),
            user: "deploy".to_string(),
            password: "secret".to_string(),
            remote_folder: "www".to_string(),
            origin_folder: temp_dir.path().to_path_buf(),
            exclude_patterns: Vec::new(),
            hash: ChecksumAlgorithm::Md5,
            timeout: Duration::from_secs(1),
            config_path: PathBuf::from(".ftprules"),
        };

        let (tx, rx) = mpsc::channel();
        thread::spawn(move || {
            let result = FtpTransport
                .connect(&config)
                .and_then(|mut session| session.upload(&local, "big.bin"));
            let _ = tx.send(result);
        });

        let result = rx
            .recv_timeout(Duration::from_secs(30))
            .expect("Upload should give up within the configured timeout");
        assert!(matches!(result, Err(TransportError::Timeout)), "got {:?}", result);
    }

    #[test]
    fn test_split_host_port() {
        assert_eq!(
            split_host_port("ftp.example.com").expect("Should parse"),
            ("ftp.example.com", 21)
        );
        assert_eq!(
            split_host_port("ftp.example.com:2121").expect("Should parse"),
            ("ftp.example.com", 2121)
        );
        assert!(split_host_port("ftp.example.com:abc").is_err());
    }

    #[test]
    fn test_bare_ipv6_keeps_default_port() {
        assert_eq!(split_host_port("::1").expect("Should parse"), ("::1", 21));
    }

    #[test]
    fn test_resolve_localhost() {
        let addr = resolve("127.0.0.1:2121").expect("Should resolve");
        assert_eq!(addr.port(), 2121);
    }
}
