//! Binding [`crate::config::ListenEndpoint`] values into real sockets
//! (spec §3 "Listen endpoint", §4.5's "share the bound listening socket
//! via inherited file descriptor").
//!
//! Binding happens once, before the supervisor forks any worker (spec
//! §4.5): a `std` listener survives `fork()` cleanly (no internal thread
//! state to corrupt), and each worker converts its copy into a `tokio`
//! listener after entering its own fresh runtime. `socket2` (already a
//! teacher dependency) gives us `SO_REUSEADDR`/`SO_REUSEPORT` and
//! `IPV6_V6ONLY` control that `std::net::TcpListener::bind` doesn't expose.

use crate::config::ListenEndpoint;
use crate::errors::ConfigError;
use socket2::{Domain, Protocol, Socket, Type};
use std::net::TcpListener as StdTcpListener;

#[cfg(unix)]
use std::os::unix::net::UnixListener as StdUnixListener;

/// A bound, not-yet-accepting-on-tokio listener. Plain `std` types so the
/// supervisor can bind before forking and each worker can hand its copy to
/// `tokio::net::{TcpListener, UnixListener}::from_std` after entering its
/// own runtime.
pub(crate) enum RawListener {
    Tcp(StdTcpListener),
    #[cfg(unix)]
    Unix(StdUnixListener),
}

/// Binds every configured endpoint, in order. Fails fast on the first bind
/// error (spec §7: bind/listen failure is fatal at startup).
pub(crate) fn bind_all(endpoints: &[ListenEndpoint], backlog: i32) -> Result<Vec<RawListener>, ConfigError> {
    endpoints.iter().map(|ep| bind_one(ep, backlog)).collect()
}

impl RawListener {
    /// Duplicates the underlying OS socket so each forked worker (spec
    /// §4.5) gets its own owned copy of every listener instead of sharing
    /// the supervisor's.
    pub(crate) fn try_clone(&self) -> std::io::Result<RawListener> {
        match self {
            RawListener::Tcp(listener) => Ok(RawListener::Tcp(listener.try_clone()?)),
            #[cfg(unix)]
            RawListener::Unix(listener) => Ok(RawListener::Unix(listener.try_clone()?)),
        }
    }
}

fn bind_one(endpoint: &ListenEndpoint, backlog: i32) -> Result<RawListener, ConfigError> {
    match endpoint {
        ListenEndpoint::Tcp { addr, dualstack_ipv6 } => {
            let domain = if addr.is_ipv6() { Domain::IPV6 } else { Domain::IPV4 };
            let socket = Socket::new(domain, Type::STREAM, Some(Protocol::TCP))
                .map_err(|source| bind_err(endpoint, source))?;
            socket.set_reuse_address(true).map_err(|source| bind_err(endpoint, source))?;
            #[cfg(unix)]
            socket.set_reuse_port(true).map_err(|source| bind_err(endpoint, source))?;
            if addr.is_ipv6() {
                socket
                    .set_only_v6(!dualstack_ipv6)
                    .map_err(|source| bind_err(endpoint, source))?;
            }
            socket.set_nonblocking(true).map_err(|source| bind_err(endpoint, source))?;
            socket.bind(&(*addr).into()).map_err(|source| bind_err(endpoint, source))?;
            socket.listen(backlog).map_err(|source| bind_err(endpoint, source))?;
            Ok(RawListener::Tcp(socket.into()))
        }
        #[cfg(unix)]
        ListenEndpoint::Unix { path, mode } => {
            // A stale socket file from a previous unclean exit would
            // otherwise make every rebind fail with `EADDRINUSE`.
            let _ = std::fs::remove_file(path);
            let listener = StdUnixListener::bind(path).map_err(|source| ConfigError::Bind {
                endpoint: format!("unix:{}", path.display()),
                source,
            })?;
            listener.set_nonblocking(true).map_err(|source| ConfigError::Bind {
                endpoint: format!("unix:{}", path.display()),
                source,
            })?;
            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt;
                let perms = std::fs::Permissions::from_mode(*mode);
                let _ = std::fs::set_permissions(path, perms);
            }
            Ok(RawListener::Unix(listener))
        }
    }
}

fn bind_err(endpoint: &ListenEndpoint, source: std::io::Error) -> ConfigError {
    ConfigError::Bind {
        endpoint: describe(endpoint),
        source,
    }
}

fn describe(endpoint: &ListenEndpoint) -> String {
    match endpoint {
        ListenEndpoint::Tcp { addr, .. } => addr.to_string(),
        #[cfg(unix)]
        ListenEndpoint::Unix { path, .. } => format!("unix:{}", path.display()),
    }
}

/// The `tokio`-side listener a worker process accepts connections from
/// after converting its inherited [`RawListener`].
pub(crate) enum Listener {
    Tcp(tokio::net::TcpListener),
    #[cfg(unix)]
    Unix(tokio::net::UnixListener),
}

impl Listener {
    pub(crate) fn from_raw(raw: RawListener) -> std::io::Result<Self> {
        match raw {
            RawListener::Tcp(std_listener) => Ok(Listener::Tcp(tokio::net::TcpListener::from_std(std_listener)?)),
            #[cfg(unix)]
            RawListener::Unix(std_listener) => Ok(Listener::Unix(tokio::net::UnixListener::from_std(std_listener)?)),
        }
    }

    pub(crate) async fn accept(&self) -> std::io::Result<(Conn, Option<std::net::SocketAddr>)> {
        match self {
            Listener::Tcp(listener) => {
                let (stream, peer) = listener.accept().await?;
                Ok((Conn::Tcp(stream), Some(peer)))
            }
            #[cfg(unix)]
            Listener::Unix(listener) => {
                let (stream, _) = listener.accept().await?;
                Ok((Conn::Unix(stream), None))
            }
        }
    }
}

/// An accepted connection, TCP or Unix domain, behind a single `AsyncRead +
/// AsyncWrite` façade so `server::connection::handle` stays transport-agnostic
/// (spec §3: unix sockets report empty `REMOTE_ADDR`/zero `REMOTE_PORT`).
pub(crate) enum Conn {
    Tcp(tokio::net::TcpStream),
    #[cfg(unix)]
    Unix(tokio::net::UnixStream),
}

impl tokio::io::AsyncRead for Conn {
    fn poll_read(
        self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
        buf: &mut tokio::io::ReadBuf<'_>,
    ) -> std::task::Poll<std::io::Result<()>> {
        match self.get_mut() {
            Conn::Tcp(s) => std::pin::Pin::new(s).poll_read(cx, buf),
            #[cfg(unix)]
            Conn::Unix(s) => std::pin::Pin::new(s).poll_read(cx, buf),
        }
    }
}

impl tokio::io::AsyncWrite for Conn {
    fn poll_write(
        self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
        buf: &[u8],
    ) -> std::task::Poll<std::io::Result<usize>> {
        match self.get_mut() {
            Conn::Tcp(s) => std::pin::Pin::new(s).poll_write(cx, buf),
            #[cfg(unix)]
            Conn::Unix(s) => std::pin::Pin::new(s).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: std::pin::Pin<&mut Self>, cx: &mut std::task::Context<'_>) -> std::task::Poll<std::io::Result<()>> {
        match self.get_mut() {
            Conn::Tcp(s) => std::pin::Pin::new(s).poll_flush(cx),
            #[cfg(unix)]
            Conn::Unix(s) => std::pin::Pin::new(s).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: std::pin::Pin<&mut Self>, cx: &mut std::task::Context<'_>) -> std::task::Poll<std::io::Result<()>> {
        match self.get_mut() {
            Conn::Tcp(s) => std::pin::Pin::new(s).poll_shutdown(cx),
            #[cfg(unix)]
            Conn::Unix(s) => std::pin::Pin::new(s).poll_shutdown(cx),
        }
    }
}
