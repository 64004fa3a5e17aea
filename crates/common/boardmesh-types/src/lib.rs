#![deny(unsafe_code)]

//! Core entities, CIDs, keys, and the canonical-payload/signature discipline
//! shared by every boardmesh crate.

pub mod canonical;
pub mod cid;
pub mod entities;
pub mod error;
pub mod keys;

pub use canonical::{sign_entity, verify_entity, RecoveryPolicy};
pub use cid::Cid;
pub use entities::{Attachment, Body, BoardLogEntry, BoardMeta, LogOp, Post, SignedEntity, ThreadMeta};
pub use error::{BoardError, Result};
pub use keys::{PrivateKey, PublicKey, Signature};
