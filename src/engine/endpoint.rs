use std::path::PathBuf;
use std::time::Duration;

use socket2::SockRef;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
#[cfg(unix)]
use tokio::net::UnixStream;

/// Where to dial. TCP is available everywhere; Unix-domain sockets only
/// where the platform supports them.
///
/// The original C++ `redisclient` this crate is modeled on carries a dead
/// second `connect()` overload gated on `BOOST_ASIO_HAS_LOCAL_SOCKETS` that
/// actually reuses the TCP endpoint type — never a real Unix socket. This
/// is a real, distinct variant instead.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Endpoint {
    Tcp(String, u16),
    #[cfg(unix)]
    Unix(PathBuf),
}

/// A socket the engine can read and write without caring whether it's a
/// TCP or Unix-domain stream.
pub trait AsyncDuplex: AsyncRead + AsyncWrite + Unpin + Send {}
impl AsyncDuplex for TcpStream {}
#[cfg(unix)]
impl AsyncDuplex for UnixStream {}

pub(crate) async fn dial(
    endpoint: &Endpoint,
    tcp_no_delay: bool,
    tcp_keep_alive: bool,
) -> std::io::Result<Box<dyn AsyncDuplex>> {
    match endpoint {
        Endpoint::Tcp(host, port) => {
            let stream = TcpStream::connect((host.as_str(), *port)).await?;
            if tcp_no_delay {
                stream.set_nodelay(true)?;
            }
            if tcp_keep_alive {
                // tokio's TcpStream has no keepalive setter of its own;
                // SockRef borrows the raw fd/handle without taking
                // ownership, so this works alongside tokio's own I/O
                // driver registration.
                let keepalive = socket2::TcpKeepalive::new().with_time(Duration::from_secs(60));
                SockRef::from(&stream).set_tcp_keepalive(&keepalive)?;
            }
            Ok(Box::new(stream))
        }
        #[cfg(unix)]
        Endpoint::Unix(path) => {
            let stream = UnixStream::connect(path).await?;
            Ok(Box::new(stream))
        }
    }
}
