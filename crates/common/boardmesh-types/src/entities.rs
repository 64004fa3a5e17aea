//! The four signed entity kinds: `Post`, `ThreadMeta`, `BoardMeta`,
//! `BoardLogEntry`. Each implements [`SignedEntity`] so the canonical-payload
//! and sign/verify discipline in `crate::canonical` is written once and
//! shared behind a small set of methods rather than duplicated per type.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::cid::Cid;
use crate::keys::{PublicKey, Signature};

const VERSION: u32 = 1;

fn opt_cid(c: &Option<Cid>) -> String {
    c.as_ref().map(|c| c.as_str().to_string()).unwrap_or_default()
}

fn canonical_join(fields: &[&str]) -> Vec<u8> {
    fields.join("\n").into_bytes()
}

/// Shared contract every signed entity implements: produce the canonical
/// signed-field byte string, expose the author key/signature slots, and
/// expose the textual fields eligible for the Latin-1 recovery repair.
pub trait SignedEntity {
    fn canonical_payload(&self) -> Vec<u8>;
    fn author_pub_key(&self) -> &PublicKey;
    fn signature(&self) -> &Signature;
    fn set_signature(&mut self, sig: Signature);
    /// Mutable references to the signed, human-authored text fields, in the
    /// order they're tried during Latin-1 recovery. Numeric/CID/key fields
    /// are excluded: they either can't suffer Latin-1 mojibake (CIDs/keys
    /// are opaque tokens, not natural-language text) or aren't signed.
    fn recoverable_text_fields_mut(&mut self) -> Vec<&mut String>;
}

/// The body of a `Post`.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Body {
    pub format: String,
    pub content: String,
}

/// A file or media reference attached to a post. Unsigned.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Attachment {
    pub cid: Cid,
    pub content_type: String,
    pub filename: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Post {
    pub thread_id: Cid,
    pub parent_post_cid: Option<Cid>,
    pub author_pub_key: PublicKey,
    pub display_name: String,
    pub body: Body,
    pub created_at: String,
    pub edited_at: Option<String>,
    #[serde(default)]
    pub meta: Value,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
    pub signature: Signature,
}

impl SignedEntity for Post {
    fn canonical_payload(&self) -> Vec<u8> {
        canonical_join(&[
            "type=post",
            &VERSION.to_string(),
            self.thread_id.as_str(),
            &opt_cid(&self.parent_post_cid),
            &self.author_pub_key.to_string(),
            &self.display_name,
            &self.body.format,
            &self.body.content,
            &self.created_at,
        ])
    }
    fn author_pub_key(&self) -> &PublicKey {
        &self.author_pub_key
    }
    fn signature(&self) -> &Signature {
        &self.signature
    }
    fn set_signature(&mut self, sig: Signature) {
        self.signature = sig;
    }
    fn recoverable_text_fields_mut(&mut self) -> Vec<&mut String> {
        vec![
            &mut self.display_name,
            &mut self.body.format,
            &mut self.body.content,
        ]
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ThreadMeta {
    pub thread_id: Cid,
    pub board_id: String,
    pub title: String,
    pub root_post_cid: Cid,
    pub created_at: String,
    pub created_by: PublicKey,
    #[serde(default)]
    pub meta: Value,
    pub signature: Signature,
}

impl SignedEntity for ThreadMeta {
    fn canonical_payload(&self) -> Vec<u8> {
        canonical_join(&[
            "type=threadMeta",
            &VERSION.to_string(),
            &self.board_id,
            &self.title,
            &self.created_at,
            &self.created_by.to_string(),
        ])
    }
    fn author_pub_key(&self) -> &PublicKey {
        &self.created_by
    }
    fn signature(&self) -> &Signature {
        &self.signature
    }
    fn set_signature(&mut self, sig: Signature) {
        self.signature = sig;
    }
    fn recoverable_text_fields_mut(&mut self) -> Vec<&mut String> {
        vec![&mut self.title]
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct BoardMeta {
    pub board_id: String,
    pub title: String,
    pub description: String,
    /// Mutable head pointer. Not part of the signed payload.
    #[serde(default)]
    pub log_head_cid: Option<Cid>,
    pub created_at: String,
    pub created_by: PublicKey,
    pub signature: Signature,
}

impl SignedEntity for BoardMeta {
    fn canonical_payload(&self) -> Vec<u8> {
        canonical_join(&[
            "type=boardMeta",
            &VERSION.to_string(),
            &self.board_id,
            &self.title,
            &self.description,
            &self.created_at,
            &self.created_by.to_string(),
        ])
    }
    fn author_pub_key(&self) -> &PublicKey {
        &self.created_by
    }
    fn signature(&self) -> &Signature {
        &self.signature
    }
    fn set_signature(&mut self, sig: Signature) {
        self.signature = sig;
    }
    fn recoverable_text_fields_mut(&mut self) -> Vec<&mut String> {
        vec![&mut self.title, &mut self.description]
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum LogOp {
    CreateThread,
    AddPost,
    EditPost,
    TombstonePost,
}

impl LogOp {
    /// Tie-break weight used when ordering tag-based fallback replay entries
    /// that share a timestamp: createThread < addPost < editPost <
    /// tombstonePost.
    pub fn order_weight(self) -> u8 {
        match self {
            LogOp::CreateThread => 0,
            LogOp::AddPost => 1,
            LogOp::EditPost => 2,
            LogOp::TombstonePost => 3,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            LogOp::CreateThread => "createThread",
            LogOp::AddPost => "addPost",
            LogOp::EditPost => "editPost",
            LogOp::TombstonePost => "tombstonePost",
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct BoardLogEntry {
    pub board_id: String,
    pub op: LogOp,
    pub thread_id: Cid,
    pub post_cid: Option<Cid>,
    pub old_post_cid: Option<Cid>,
    pub new_post_cid: Option<Cid>,
    pub target_post_cid: Option<Cid>,
    pub reason: Option<String>,
    pub created_at: String,
    pub author_pub_key: PublicKey,
    pub prev_log_cid: Option<Cid>,
    pub signature: Signature,
}

impl SignedEntity for BoardLogEntry {
    fn canonical_payload(&self) -> Vec<u8> {
        canonical_join(&[
            "type=boardLogEntry",
            &VERSION.to_string(),
            &self.board_id,
            self.op.as_str(),
            self.thread_id.as_str(),
            &opt_cid(&self.post_cid),
            &opt_cid(&self.old_post_cid),
            &opt_cid(&self.new_post_cid),
            &opt_cid(&self.target_post_cid),
            self.reason.as_deref().unwrap_or(""),
            &self.created_at,
            &self.author_pub_key.to_string(),
            &opt_cid(&self.prev_log_cid),
        ])
    }
    fn author_pub_key(&self) -> &PublicKey {
        &self.author_pub_key
    }
    fn signature(&self) -> &Signature {
        &self.signature
    }
    fn set_signature(&mut self, sig: Signature) {
        self.signature = sig;
    }
    fn recoverable_text_fields_mut(&mut self) -> Vec<&mut String> {
        match &mut self.reason {
            Some(r) => vec![r],
            None => vec![],
        }
    }
}
