//! Blocking I/O loop around [`Connection`].
//!
//! Wraps any `Read + Write` transport (a `TcpStream`, a TLS stream that has
//! already negotiated `h2`, an in-memory pipe in tests) and answers every
//! request through a [`Handler`].

use std::collections::VecDeque;
use std::io::{self, Read, Write};

use tracing::{debug, warn};

use crate::config::ConnectionConfig;
use crate::connection::{Connection, ConnectionEvent};
use crate::error::H2Error;
use crate::message::{Request, Response};
use crate::stream::StreamState;

const READ_BUFFER_SIZE: usize = 16 * 1024;

/// Produces a response for each request, including promised pushes.
pub trait Handler {
    fn handle(&mut self, request: &Request) -> Response;
}

impl<F> Handler for F
where
    F: FnMut(&Request) -> Response,
{
    fn handle(&mut self, request: &Request) -> Response {
        self(request)
    }
}

/// Serve one connection until the peer closes the transport or either side
/// ends the connection.
///
/// On a connection error the queued GOAWAY is written before the error is
/// returned.
pub fn serve<S, H>(mut io: S, config: ConnectionConfig, mut handler: H) -> Result<(), H2Error>
where
    S: Read + Write,
    H: Handler,
{
    let mut conn = Connection::new(config);
    let mut buf = vec![0u8; READ_BUFFER_SIZE];
    flush(&mut io, &mut conn)?;

    loop {
        let n = match io.read(&mut buf) {
            Ok(0) => {
                debug!("peer closed the transport");
                return Ok(());
            }
            Ok(n) => n,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => return Err(err.into()),
        };

        let events = match conn.receive(&buf[..n]) {
            Ok(events) => events,
            Err(err) => {
                if let Err(io_err) = flush(&mut io, &mut conn) {
                    debug!(%io_err, "failed to write GOAWAY");
                }
                return Err(err);
            }
        };

        for event in events {
            match event {
                ConnectionEvent::Request(request) => {
                    if let Err(err) = answer(&mut conn, &mut handler, request) {
                        conn.goaway(err.code());
                        flush(&mut io, &mut conn)?;
                        return Err(err);
                    }
                }
                ConnectionEvent::GoAway {
                    last_stream_id,
                    error_code,
                    ..
                } => debug!(last_stream_id, %error_code, "peer sent GOAWAY"),
                other => debug!(event = ?other, "connection event"),
            }
        }

        flush(&mut io, &mut conn)?;
        if conn.is_closed() {
            return Ok(());
        }
    }
}

/// Answer `request` and every push it promises, in order.
fn answer<H: Handler>(
    conn: &mut Connection,
    handler: &mut H,
    request: Request,
) -> Result<(), H2Error> {
    let mut queue = VecDeque::from([request]);
    while let Some(request) = queue.pop_front() {
        let stream_id = request.stream_id;
        if conn.stream_state(stream_id) == StreamState::Closed {
            debug!(stream_id, "stream reset before it was answered, skipping");
            continue;
        }
        let response = handler.handle(&request);
        match conn.respond(stream_id, response) {
            Ok(promised) => queue.extend(promised),
            Err(err) if err.is_connection_error() => return Err(err),
            Err(err) => {
                warn!(stream_id, %err, "response rejected, resetting stream");
                if let Err(reset_err) = conn.reset_stream(stream_id, err.code()) {
                    debug!(stream_id, %reset_err, "stream already closed");
                }
            }
        }
    }
    Ok(())
}

fn flush<S: Write>(io: &mut S, conn: &mut Connection) -> Result<(), H2Error> {
    if !conn.has_output() {
        return Ok(());
    }
    let output = conn.take_output();
    io.write_all(&output)?;
    io.flush()?;
    Ok(())
}
