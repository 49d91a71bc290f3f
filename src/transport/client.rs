use std::fs;
use std::io::{self, ErrorKind, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use std::thread;
use std::time::{Duration, Instant};

use log::{debug, info, warn};
use serialport::{ClearBuffer, SerialPort, SerialPortType};

use crate::transport::protocol::{
    find_subsequence, parse_listing, parse_sending_header, Command, FileEntry, END_OF_FILE,
    LIST_FOOTER,
};
use crate::transport::{TransportError, TransportTimeouts};

pub const DEFAULT_BAUD_RATE: u32 = 115_200;
/// USB descriptions that identify the logger.
const PORT_KEYWORDS: [&str; 3] = ["teensy", "usb serial", "usb2.0-serial"];
/// Sleep between polls when the link has nothing to read.
const POLL_INTERVAL: Duration = Duration::from_millis(10);
/// Per-read timeout of the serial port itself.
const PORT_READ_TIMEOUT: Duration = Duration::from_millis(10);
/// Delay after opening while the board resets.
const SETTLE_DELAY: Duration = Duration::from_secs(2);

/// A file received with `GET`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Download {
    pub name: String,
    /// Size from the header, when it parsed.
    pub declared_size: Option<u64>,
    pub data: Vec<u8>,
}

/// Link state guarded by the client lock: the byte stream and whatever has
/// been read past the last consumed line.
struct Channel<L> {
    link: L,
    pending: Vec<u8>,
}

impl<L: Read + Write> Channel<L> {
    fn send(&mut self, command: &Command) -> Result<(), TransportError> {
        let line = command.to_line();
        debug!("-> {}", line.trim_end());
        self.link.write_all(line.as_bytes())?;
        self.link.flush()?;
        Ok(())
    }

    /// One read attempt; sleeps briefly when nothing arrived.
    fn poll(&mut self) -> Result<usize, TransportError> {
        let mut chunk = [0u8; 4096];
        match self.link.read(&mut chunk) {
            Ok(0) => {
                thread::sleep(POLL_INTERVAL);
                Ok(0)
            }
            Ok(n) => {
                self.pending.extend_from_slice(&chunk[..n]);
                Ok(n)
            }
            Err(e) if is_idle(&e) => {
                thread::sleep(POLL_INTERVAL);
                Ok(0)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Drops stale input left over from earlier exchanges.
    fn discard_input(&mut self, deadline: Instant) -> Result<(), TransportError> {
        self.pending.clear();
        let mut chunk = [0u8; 4096];
        while Instant::now() < deadline {
            match self.link.read(&mut chunk) {
                Ok(0) => break,
                Ok(n) => debug!("discarded {n} stale byte(s)"),
                Err(e) if is_idle(&e) => break,
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    fn read_line(&mut self, deadline: Instant) -> Result<Option<String>, TransportError> {
        loop {
            if let Some(pos) = self.pending.iter().position(|&b| b == b'\n') {
                let line: Vec<u8> = self.pending.drain(..=pos).collect();
                return Ok(Some(String::from_utf8_lossy(&line).trim_end().to_string()));
            }
            if Instant::now() >= deadline {
                return Ok(None);
            }
            self.poll()?;
        }
    }

    /// Reads text until `done` accepts the accumulated reply.
    fn read_reply(
        &mut self,
        deadline: Instant,
        done: impl Fn(&str) -> bool,
    ) -> Result<String, TransportError> {
        loop {
            let text = String::from_utf8_lossy(&self.pending).into_owned();
            if !text.is_empty() && done(&text) {
                self.pending.clear();
                return Ok(text.trim().to_string());
            }
            if Instant::now() >= deadline {
                return Err(TransportError::Timeout { stage: "command reply" });
            }
            self.poll()?;
        }
    }

    /// Reads exactly `size` bytes of payload.
    fn read_exact_bytes(&mut self, size: usize, deadline: Instant) -> Result<Vec<u8>, TransportError> {
        while self.pending.len() < size {
            if Instant::now() >= deadline {
                warn!("payload stalled at {} of {size} byte(s)", self.pending.len());
                return Err(TransportError::Timeout { stage: "payload" });
            }
            self.poll()?;
        }
        Ok(self.pending.drain(..size).collect())
    }

    /// Reads until the sentinel and returns what preceded it. Bytes after
    /// the sentinel stay pending.
    fn read_until_sentinel(
        &mut self,
        deadline: Instant,
        stage: &'static str,
    ) -> Result<Vec<u8>, TransportError> {
        loop {
            if let Some(pos) = find_subsequence(&self.pending, END_OF_FILE) {
                let rest = self.pending.split_off(pos + END_OF_FILE.len());
                let mut data = std::mem::replace(&mut self.pending, rest);
                data.truncate(pos);
                return Ok(data);
            }
            if Instant::now() >= deadline {
                return Err(TransportError::Timeout { stage });
            }
            self.poll()?;
        }
    }
}

fn is_idle(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        ErrorKind::TimedOut | ErrorKind::WouldBlock | ErrorKind::Interrupted
    )
}

/// SD-card client over any byte link. Requests are serialized by one lock;
/// a failed wait is reported and never retried.
pub struct SdClient<L> {
    channel: Mutex<Channel<L>>,
    timeouts: TransportTimeouts,
}

impl<L: Read + Write + Send> SdClient<L> {
    pub fn new(link: L, timeouts: TransportTimeouts) -> Result<Self, TransportError> {
        timeouts.validate()?;
        Ok(Self {
            channel: Mutex::new(Channel {
                link,
                pending: Vec::new(),
            }),
            timeouts,
        })
    }

    pub fn timeouts(&self) -> TransportTimeouts {
        self.timeouts
    }

    fn lock(&self) -> Result<MutexGuard<'_, Channel<L>>, TransportError> {
        self.channel.lock().map_err(|_| TransportError::LockPoisoned)
    }

    pub fn list_files(&self) -> Result<Vec<FileEntry>, TransportError> {
        let timeout = self.timeouts.command()?;
        let mut channel = self.lock()?;
        let deadline = Instant::now() + timeout;
        channel.send(&Command::List)?;
        let reply = channel.read_reply(deadline, |text| text.contains(LIST_FOOTER))?;
        Ok(parse_listing(&reply))
    }

    pub fn help(&self) -> Result<String, TransportError> {
        self.simple(&Command::Help)
    }

    pub fn delete(&self, name: &str) -> Result<String, TransportError> {
        self.simple(&Command::Delete(name.to_string()))
    }

    pub fn delete_all(&self) -> Result<String, TransportError> {
        self.simple(&Command::DeleteAll)
    }

    /// Command whose reply is complete once it ends with a newline.
    fn simple(&self, command: &Command) -> Result<String, TransportError> {
        let timeout = self.timeouts.command()?;
        let mut channel = self.lock()?;
        let deadline = Instant::now() + timeout;
        channel.send(command)?;
        channel.read_reply(deadline, |text| text.ends_with('\n'))
    }

    /// Transfers one file.
    ///
    /// Lines before the `SENDING:` header are ignored. With a known size the
    /// payload is read to that length and the sentinel consumed afterwards;
    /// otherwise everything up to the sentinel is the payload.
    pub fn fetch(&self, name: &str) -> Result<Download, TransportError> {
        let header_timeout = self.timeouts.header()?;
        let payload_timeout = self.timeouts.payload()?;
        let sentinel_timeout = self.timeouts.sentinel()?;

        let mut channel = self.lock()?;
        channel.discard_input(Instant::now() + self.timeouts.command()?)?;
        channel.send(&Command::Get(name.to_string()))?;

        let header_deadline = Instant::now() + header_timeout;
        let (sent_name, declared_size) = loop {
            let Some(line) = channel.read_line(header_deadline)? else {
                return Err(TransportError::Timeout { stage: "header" });
            };
            match parse_sending_header(&line) {
                Some(header) => break header,
                None if line.is_empty() => {}
                None => debug!("ignoring line before header: {line}"),
            }
        };
        if declared_size.is_none() {
            warn!("could not read the size of {sent_name}, reading up to the end marker");
        }

        let payload_deadline = Instant::now() + payload_timeout;
        let data = match declared_size {
            Some(size) => {
                let size = usize::try_from(size).map_err(|_| {
                    TransportError::Protocol(format!("announced size {size} is too large"))
                })?;
                let data = channel.read_exact_bytes(size, payload_deadline)?;
                channel.read_until_sentinel(Instant::now() + sentinel_timeout, "sentinel")?;
                data
            }
            None => {
                let data = channel.read_until_sentinel(payload_deadline, "payload")?;
                if data.is_empty() {
                    return Err(TransportError::Protocol(format!("no data received for {name}")));
                }
                data
            }
        };
        info!("received {sent_name}: {} byte(s)", data.len());
        Ok(Download {
            name: sent_name,
            declared_size,
            data,
        })
    }

    /// Fetches `name` into `out_dir`, keeping only its file-name component.
    pub fn download(&self, name: &str, out_dir: impl AsRef<Path>) -> Result<PathBuf, TransportError> {
        let file_name = Path::new(name)
            .file_name()
            .ok_or_else(|| TransportError::Protocol(format!("invalid file name {name:?}")))?
            .to_owned();
        let download = self.fetch(name)?;
        let out_dir = out_dir.as_ref();
        fs::create_dir_all(out_dir)?;
        let path = out_dir.join(file_name);
        fs::write(&path, &download.data)?;
        info!("saved {}", path.display());
        Ok(path)
    }
}

/// An open serial connection to the logger.
pub struct SerialLink {
    port_name: String,
    port: Box<dyn SerialPort>,
}

impl SerialLink {
    /// Opens `port`, or the first USB port that looks like the logger.
    pub fn open(port: Option<&str>, baud_rate: u32) -> Result<Self, TransportError> {
        let port_name = match port {
            Some(name) => name.to_string(),
            None => find_logger_port()?,
        };
        info!("connecting to {port_name} at {baud_rate} baud");
        let mut port = serialport::new(&port_name, baud_rate)
            .timeout(PORT_READ_TIMEOUT)
            .open()?;
        thread::sleep(SETTLE_DELAY);
        port.clear(ClearBuffer::Input)?;
        Ok(Self { port_name, port })
    }

    pub fn port_name(&self) -> &str {
        &self.port_name
    }
}

impl Read for SerialLink {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.port.read(buf)
    }
}

impl Write for SerialLink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.port.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.port.flush()
    }
}

pub fn find_logger_port() -> Result<String, TransportError> {
    let ports = serialport::available_ports()?;
    for port in &ports {
        if let SerialPortType::UsbPort(usb) = &port.port_type {
            let description = [usb.product.as_deref(), usb.manufacturer.as_deref()]
                .into_iter()
                .flatten()
                .collect::<Vec<_>>()
                .join(" ")
                .to_lowercase();
            if PORT_KEYWORDS.iter().any(|k| description.contains(k)) {
                return Ok(port.port_name.clone());
            }
        }
    }
    for port in &ports {
        info!("available port: {} ({:?})", port.port_name, port.port_type);
    }
    Err(TransportError::NoPort)
}
