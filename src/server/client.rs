//! Client for connecting to the search server daemon

use crate::content::{ContentType, IndexOwner, IndexedDocument};
use crate::pipeline::OperationKind;
use crate::query::SearchQuery;
use crate::results::SuggestResults;
use crate::server::get_socket_path;
use crate::server::protocol::{
    Request, Response, SearchResponse, StatusResponse, read_message, write_message,
};
use std::io::{BufReader, BufWriter};
use std::os::unix::net::UnixStream;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Read/write timeout
const IO_TIMEOUT: Duration = Duration::from_secs(30);

/// Result type for client operations
pub type ClientResult<T> = Result<T, ClientError>;

/// Errors that can occur in client operations
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("search server is not running")]
    NotRunning,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Server returned an error
    #[error("server error: {0}")]
    Server(String),

    #[error("unexpected response from server")]
    InvalidResponse,
}

/// Client for the search server
pub struct IndexClient {
    reader: BufReader<UnixStream>,
    writer: BufWriter<UnixStream>,
}

impl IndexClient {
    /// Try to connect to the running daemon
    /// Returns None if daemon is not running (allowing fallback to direct mode)
    pub fn connect() -> Option<Self> {
        Self::connect_to(&get_socket_path())
    }

    pub fn connect_to(socket_path: &Path) -> Option<Self> {
        // Quick check if socket exists
        if !socket_path.exists() {
            return None;
        }

        let stream = UnixStream::connect(socket_path).ok()?;
        let _ = stream.set_read_timeout(Some(IO_TIMEOUT));
        let _ = stream.set_write_timeout(Some(IO_TIMEOUT));

        let reader = BufReader::new(stream.try_clone().ok()?);
        let writer = BufWriter::new(stream);

        Some(Self { reader, writer })
    }

    /// Connect or return an error (for when daemon is required)
    pub fn connect_required() -> ClientResult<Self> {
        Self::connect().ok_or(ClientError::NotRunning)
    }

    fn call(&mut self, request: &Request) -> ClientResult<Response> {
        write_message(&mut self.writer, request)?;
        match read_message(&mut self.reader)? {
            Response::Error { message } => Err(ClientError::Server(message)),
            response => Ok(response),
        }
    }

    pub fn search(&mut self, query: &SearchQuery) -> ClientResult<SearchResponse> {
        let request = Request::Search {
            query: query.clone(),
        };
        match self.call(&request)? {
            Response::Search(sr) => Ok(sr),
            _ => Err(ClientError::InvalidResponse),
        }
    }

    pub fn suggest_and_search(&mut self, query: &SearchQuery) -> ClientResult<SearchResponse> {
        let request = Request::SuggestAndSearch {
            query: query.clone(),
        };
        match self.call(&request)? {
            Response::Search(sr) => Ok(sr),
            _ => Err(ClientError::InvalidResponse),
        }
    }

    pub fn suggest(&mut self, query: &SearchQuery) -> ClientResult<SuggestResults> {
        let request = Request::Suggest {
            query: query.clone(),
        };
        match self.call(&request)? {
            Response::Suggest(results) => Ok(results),
            _ => Err(ClientError::InvalidResponse),
        }
    }

    /// Index synchronously; returns the new generation
    pub fn index(&mut self, owner: &IndexOwner, document: IndexedDocument) -> ClientResult<u64> {
        let request = Request::Index {
            entity: owner.entity.clone(),
            kind: owner.kind,
            document,
        };
        match self.call(&request)? {
            Response::Indexed { generation, .. } => Ok(generation),
            _ => Err(ClientError::InvalidResponse),
        }
    }

    pub fn delete(&mut self, owner: &IndexOwner, content_type: ContentType, oid: &str) -> ClientResult<bool> {
        let request = Request::Delete {
            entity: owner.entity.clone(),
            kind: owner.kind,
            content_type,
            oid: oid.to_string(),
        };
        match self.call(&request)? {
            Response::Deleted { found } => Ok(found),
            _ => Err(ClientError::InvalidResponse),
        }
    }

    /// Queue a write; returns the message version
    pub fn enqueue(
        &mut self,
        owner: &IndexOwner,
        content_type: ContentType,
        op: OperationKind,
        docid: &str,
    ) -> ClientResult<u64> {
        let request = Request::Enqueue {
            entity: owner.entity.clone(),
            kind: owner.kind,
            content_type,
            op,
            docid: docid.to_string(),
        };
        match self.call(&request)? {
            Response::Enqueued { version } => Ok(version),
            _ => Err(ClientError::InvalidResponse),
        }
    }

    /// Get server status
    pub fn status(&mut self) -> ClientResult<StatusResponse> {
        match self.call(&Request::Status)? {
            Response::Status(status) => Ok(status),
            _ => Err(ClientError::InvalidResponse),
        }
    }

    /// Request graceful shutdown
    pub fn shutdown(&mut self) -> ClientResult<()> {
        match self.call(&Request::Shutdown)? {
            Response::ShuttingDown => Ok(()),
            _ => Err(ClientError::InvalidResponse),
        }
    }

    /// Ping the server
    pub fn ping(&mut self) -> ClientResult<()> {
        match self.call(&Request::Ping)? {
            Response::Pong => Ok(()),
            _ => Err(ClientError::InvalidResponse),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connect_missing_socket() {
        let tmp = tempfile::TempDir::new().unwrap();
        assert!(IndexClient::connect_to(&tmp.path().join("none.sock")).is_none());
    }

    #[test]
    fn test_error_messages() {
        assert_eq!(ClientError::NotRunning.to_string(), "search server is not running");
        assert_eq!(
            ClientError::Server("boom".to_string()).to_string(),
            "server error: boom"
        );
    }
}
