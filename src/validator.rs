use std::fs::File;
use std::io::Read;
use std::path::Path;

use sha2::{Digest, Sha256};
use tracing::warn;

use crate::http::Request;

pub const NODE_ID_HEADER: &str = "pacprism_node_id";
pub const NODE_SIGNATURE_HEADER: &str = "pacprism_node_signature";

const SHA256_CHUNK: usize = 8192;

/// Request classification produced by the validator.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RequestType {
    /// Regular client request, no node headers.
    PlainClient,
    /// Peer node with a verified signature.
    Node,
    /// Missing one header, or signature verification failed.
    Invalid,
}

/// Signature oracle over the raw request body. The deployment default
/// accepts everything; a real deployment supplies an asymmetric verifier.
pub trait NodeVerifier: Send + Sync {
    fn verify(&self, node_id: &str, signature: &str, body: &str) -> bool;
}

pub struct AcceptAllVerifier;

impl NodeVerifier for AcceptAllVerifier {
    fn verify(&self, _node_id: &str, _signature: &str, _body: &str) -> bool {
        true
    }
}

pub struct Validator {
    verifier: Box<dyn NodeVerifier>,
}

impl Validator {
    pub fn new(verifier: Box<dyn NodeVerifier>) -> Self {
        Validator { verifier }
    }

    pub fn accept_all() -> Self {
        Validator::new(Box::new(AcceptAllVerifier))
    }

    /// Classify a request by its node identification headers.
    pub fn classify(&self, request: &Request) -> RequestType {
        let node_id = request.header(NODE_ID_HEADER);
        let signature = request.header(NODE_SIGNATURE_HEADER);

        match (node_id, signature) {
            (None, None) => RequestType::PlainClient,
            (Some(node_id), Some(signature)) => {
                if self.verifier.verify(node_id, signature, &request.body) {
                    RequestType::Node
                } else {
                    RequestType::Invalid
                }
            }
            // Exactly one header present.
            _ => RequestType::Invalid,
        }
    }
}

/// SHA-256 of a file as 64 lowercase hex characters. An empty string
/// signals an IO failure.
pub fn calculate_sha256(file_path: &Path) -> String {
    let mut file = match File::open(file_path) {
        Ok(file) => file,
        Err(err) => {
            warn!(path = %file_path.display(), error = %err, "failed to open file for hashing");
            return String::new();
        }
    };

    let mut hasher = Sha256::new();
    let mut buffer = [0u8; SHA256_CHUNK];
    loop {
        match file.read(&mut buffer) {
            Ok(0) => break,
            Ok(n) => hasher.update(&buffer[..n]),
            Err(err) => {
                warn!(path = %file_path.display(), error = %err, "failed to read file for hashing");
                return String::new();
            }
        }
    }

    hex::encode(hasher.finalize())
}

/// Compare a file's digest against an expected hex digest,
/// case-insensitively. False when the file cannot be hashed.
pub fn verify_sha256(file_path: &Path, expected: &str) -> bool {
    let calculated = calculate_sha256(file_path);
    !calculated.is_empty() && calculated.eq_ignore_ascii_case(expected)
}
