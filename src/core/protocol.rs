use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

use crate::core::peer::{PeerId, PeerInfo};

/// One frame on the wire. A reply reuses the id of the request it answers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub timestamp: u64,
    pub payload: Payload,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Payload {
    Request(Request),
    Reply(Reply),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Request {
    // Directory
    Connect(ConnectRequest),
    RegisterFile(RegisterFileRequest),
    SearchFile(SearchFileRequest),

    // Peer
    AcceptConnect(AcceptConnectRequest),
    ServeFile(ServeFileRequest),
    ListFiles(ListFilesRequest),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Reply {
    Connect(ConnectReply),
    RegisterFile(RegisterFileReply),
    SearchFile(SearchFileReply),
    AcceptConnect(AcceptConnectReply),
    ServeFile(ServeFileReply),
    ListFiles(ListFilesReply),
    Error(ErrorReply),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectRequest {
    pub address: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectReply {
    pub peer_id: PeerId,
    pub accepted: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegisterFileRequest {
    pub peer_id: PeerId,
    pub file_name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegisterFileReply {
    pub file_name: String,
    pub received: bool,
    pub accepted: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchFileRequest {
    pub peer_id: PeerId,
    pub file_name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchFileReply {
    pub file_name: String,
    pub found: bool,
    pub owners: Vec<PeerInfo>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AcceptConnectRequest {
    pub peer_id: PeerId,
    pub address: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AcceptConnectReply {
    /// The accepting peer's own identity, if it has one yet.
    pub peer_id: Option<PeerId>,
    pub accepted: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServeFileRequest {
    pub peer_id: PeerId,
    pub file_name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServeFileReply {
    pub peer_id: PeerId,
    pub exists: bool,
    pub file_name: String,
    #[serde(with = "hex_bytes")]
    pub contents: Vec<u8>,
    pub error_message: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListFilesRequest {
    pub peer_id: Option<PeerId>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListFilesReply {
    pub file_names: Vec<String>,
    pub peer_id: Option<PeerId>,
    pub count: usize,
    pub accepted: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorKind {
    CapacityExceeded,
    Storage,
    NotConnected,
    Unsupported,
    Internal,
}

/// An application failure that has to reach the caller as an error, not as a
/// negative field in a regular reply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorReply {
    pub kind: ErrorKind,
    pub message: String,
}

impl Message {
    pub fn new(id: Uuid, payload: Payload) -> Self {
        Self {
            id,
            timestamp: SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_secs())
                .unwrap_or(0),
            payload,
        }
    }

    pub fn request(request: Request) -> Self {
        Self::new(Uuid::new_v4(), Payload::Request(request))
    }

    pub fn reply_to(request_id: Uuid, reply: Reply) -> Self {
        Self::new(request_id, Payload::Reply(reply))
    }
}

impl Request {
    /// Service-qualified operation name, used in logs and error messages.
    pub fn operation(&self) -> &'static str {
        match self {
            Request::Connect(_) => "Directory.Connect",
            Request::RegisterFile(_) => "Directory.RegisterFile",
            Request::SearchFile(_) => "Directory.SearchFile",
            Request::AcceptConnect(_) => "Peer.AcceptConnect",
            Request::ServeFile(_) => "Peer.ServeFile",
            Request::ListFiles(_) => "Peer.ListFilesReply",
        }
    }
}

impl Reply {
    pub fn kind(&self) -> &'static str {
        match self {
            Reply::Connect(_) => "Connect",
            Reply::RegisterFile(_) => "RegisterFile",
            Reply::SearchFile(_) => "SearchFile",
            Reply::AcceptConnect(_) => "AcceptConnect",
            Reply::ServeFile(_) => "ServeFile",
            Reply::ListFiles(_) => "ListFiles",
            Reply::Error(_) => "Error",
        }
    }
}

/// File bytes travel hex-encoded inside the JSON frame.
mod hex_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        hex::decode(encoded).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_contents_are_hex_on_the_wire() {
        let reply = Message::reply_to(
            Uuid::new_v4(),
            Reply::ServeFile(ServeFileReply {
                peer_id: PeerId(1),
                exists: true,
                file_name: "a.txt".to_string(),
                contents: b"hi".to_vec(),
                error_message: None,
            }),
        );

        let json = serde_json::to_value(&reply).unwrap();
        assert_eq!(json["payload"]["Reply"]["ServeFile"]["contents"], "6869");

        let decoded: Message = serde_json::from_value(json).unwrap();
        match decoded.payload {
            Payload::Reply(Reply::ServeFile(r)) => assert_eq!(r.contents, b"hi"),
            other => panic!("unexpected payload: {:?}", other),
        }
    }

    #[test]
    fn test_reply_keeps_request_id() {
        let request = Message::request(Request::ListFiles(ListFilesRequest { peer_id: None }));
        let reply = Message::reply_to(
            request.id,
            Reply::ListFiles(ListFilesReply {
                file_names: vec![],
                peer_id: None,
                count: 0,
                accepted: true,
            }),
        );
        assert_eq!(request.id, reply.id);
    }

    #[test]
    fn test_operation_names() {
        let search = Request::SearchFile(SearchFileRequest {
            peer_id: PeerId(0),
            file_name: "a".into(),
        });
        assert_eq!(search.operation(), "Directory.SearchFile");
        assert_eq!(
            Request::ListFiles(ListFilesRequest { peer_id: None }).operation(),
            "Peer.ListFilesReply"
        );
    }
}
