//! Byte transports to the module: a local serial device, or a serial port
//! exported over TCP (`tcp://host:port`, e.g. ser2net).

use std::io::{self, Read, Write};
use std::net::TcpStream;
use std::time::Duration;

use telelink::{Connector, Transport};
use tracing::debug;

/// Picks the driver from the device string.
pub struct DeviceConnector;

impl Connector for DeviceConnector {
    fn open(&self, device: &str, baud: u32) -> io::Result<Box<dyn Transport>> {
        match device.strip_prefix("tcp://") {
            Some(addr) => TcpBridge::connect(addr).map(|t| Box::new(t) as Box<dyn Transport>),
            None => open_serial(device, baud),
        }
    }
}

// ─── Serial ─────────────────────────────────────────────────────────────────

#[cfg(feature = "serial")]
fn open_serial(device: &str, baud: u32) -> io::Result<Box<dyn Transport>> {
    let port = serialport::new(device, baud)
        .data_bits(serialport::DataBits::Eight)
        .stop_bits(serialport::StopBits::One)
        .parity(serialport::Parity::None)
        .flow_control(serialport::FlowControl::None)
        .timeout(Duration::from_millis(50))
        .open()
        .map_err(io::Error::from)?;
    debug!(device, baud, "serial port open");
    Ok(Box::new(SerialTransport { port }))
}

#[cfg(not(feature = "serial"))]
fn open_serial(device: &str, _baud: u32) -> io::Result<Box<dyn Transport>> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        format!("{device}: built without serial support, use tcp://host:port or --simulate"),
    ))
}

#[cfg(feature = "serial")]
struct SerialTransport {
    port: Box<dyn serialport::SerialPort>,
}

#[cfg(feature = "serial")]
impl Transport for SerialTransport {
    fn write(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.port.write_all(bytes)?;
        self.port.flush()
    }

    fn read_available(&mut self) -> io::Result<Vec<u8>> {
        let available = self.port.bytes_to_read().map_err(io::Error::from)? as usize;
        if available == 0 {
            return Ok(Vec::new());
        }
        let mut buf = vec![0u8; available];
        let n = self.port.read(&mut buf)?;
        buf.truncate(n);
        Ok(buf)
    }

    fn read_timeout(&mut self, timeout: Duration) -> io::Result<Vec<u8>> {
        self.port
            .set_timeout(timeout.max(Duration::from_millis(1)))
            .map_err(io::Error::from)?;
        let mut buf = [0u8; 512];
        match self.port.read(&mut buf) {
            Ok(n) => Ok(buf[..n].to_vec()),
            Err(e) if matches!(e.kind(), io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock) => {
                Ok(Vec::new())
            }
            Err(e) => Err(e),
        }
    }

    fn close(&mut self) -> io::Result<()> {
        self.port.flush()
    }
}

// ─── TCP Bridge ─────────────────────────────────────────────────────────────

struct TcpBridge {
    stream: TcpStream,
}

impl TcpBridge {
    fn connect(addr: &str) -> io::Result<Self> {
        let stream = TcpStream::connect(addr)?;
        stream.set_nodelay(true)?;
        stream.set_nonblocking(true)?;
        debug!(addr, "serial bridge connected");
        Ok(TcpBridge { stream })
    }
}

impl Transport for TcpBridge {
    fn write(&mut self, mut bytes: &[u8]) -> io::Result<()> {
        while !bytes.is_empty() {
            match self.stream.write(bytes) {
                Ok(0) => return Err(io::ErrorKind::WriteZero.into()),
                Ok(n) => bytes = &bytes[n..],
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    std::thread::sleep(Duration::from_millis(1));
                }
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    fn read_available(&mut self) -> io::Result<Vec<u8>> {
        let mut out = Vec::new();
        let mut buf = [0u8; 512];
        loop {
            match self.stream.read(&mut buf) {
                Ok(0) => {
                    if out.is_empty() {
                        return Err(io::ErrorKind::UnexpectedEof.into());
                    }
                    return Ok(out);
                }
                Ok(n) => out.extend_from_slice(&buf[..n]),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(out),
                Err(e) => return Err(e),
            }
        }
    }

    fn close(&mut self) -> io::Result<()> {
        self.stream.shutdown(std::net::Shutdown::Both)
    }
}
