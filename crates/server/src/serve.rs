//! TCP accept loops for both services
//!
//! One task per accepted connection; requests on a connection are served
//! in order (the client keeps one request in flight), while connections
//! proceed independently. A blocked lock acquisition therefore stalls
//! only its own connection.

use crate::coordinator::CoordinatorService;
use crate::node::NodeService;
use basalt_wire::{read_frame, write_frame, CoordinatorRequest, Envelope, NodeRequest, WireError};
use std::io::ErrorKind;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};

/// Accept and serve node connections forever
pub async fn serve_node(listener: TcpListener, service: Arc<NodeService>) -> std::io::Result<()> {
    loop {
        let (stream, peer) = listener.accept().await?;
        tracing::debug!(%peer, node = service.index(), "accepted connection");
        stream.set_nodelay(true).ok();
        let service = Arc::clone(&service);
        tokio::spawn(async move {
            if let Err(e) = node_connection(stream, service).await {
                tracing::debug!(%peer, error = %e, "connection ended with error");
            }
        });
    }
}

/// Accept and serve coordinator connections forever
pub async fn serve_coordinator(
    listener: TcpListener,
    service: Arc<CoordinatorService>,
) -> std::io::Result<()> {
    loop {
        let (stream, peer) = listener.accept().await?;
        tracing::debug!(%peer, "accepted connection");
        stream.set_nodelay(true).ok();
        let service = Arc::clone(&service);
        tokio::spawn(async move {
            if let Err(e) = coordinator_connection(stream, service).await {
                tracing::debug!(%peer, error = %e, "connection ended with error");
            }
        });
    }
}

async fn node_connection(
    mut stream: TcpStream,
    service: Arc<NodeService>,
) -> Result<(), WireError> {
    loop {
        let envelope: Envelope<NodeRequest> = match read_frame(&mut stream).await {
            Ok(envelope) => envelope,
            Err(e) if is_hangup(&e) => return Ok(()),
            Err(e) => return Err(e),
        };
        let response = service.handle(envelope.body).await;
        write_frame(&mut stream, &Envelope::new(envelope.request_id, response)).await?;
    }
}

async fn coordinator_connection(
    mut stream: TcpStream,
    service: Arc<CoordinatorService>,
) -> Result<(), WireError> {
    loop {
        let envelope: Envelope<CoordinatorRequest> = match read_frame(&mut stream).await {
            Ok(envelope) => envelope,
            Err(e) if is_hangup(&e) => return Ok(()),
            Err(e) => return Err(e),
        };
        let response = service.handle(envelope.body).await;
        write_frame(&mut stream, &Envelope::new(envelope.request_id, response)).await?;
    }
}

/// A clean close between frames is the peer finishing, not a failure
fn is_hangup(error: &WireError) -> bool {
    matches!(error, WireError::Io(e)
        if e.kind() == ErrorKind::UnexpectedEof
            || e.kind() == ErrorKind::ConnectionReset
            || e.kind() == ErrorKind::BrokenPipe)
}
