//! Sign/verify discipline shared by every entity kind, plus the Latin-1
//! mojibake recovery fallback described in the data model.
//!
//! This is a compatibility patch for data produced by clients that
//! mis-decoded UTF-8 as Latin-1 before signing. It is gated behind
//! [`RecoveryPolicy`] so deployments that never see such data can disable it.

use crate::entities::SignedEntity;
use crate::error::BoardError;
use crate::keys::PrivateKey;

/// Whether the Latin-1 repair fallback is attempted on verification failure.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RecoveryPolicy {
    Disabled,
    Enabled,
}

impl Default for RecoveryPolicy {
    fn default() -> Self {
        RecoveryPolicy::Enabled
    }
}

/// Sets the author field, version/type discriminant (already fixed in
/// `canonical_payload`), and the signature on `entity` using `priv_key`.
pub fn sign_entity<T: SignedEntity>(priv_key: &PrivateKey, entity: &mut T) {
    let payload = entity.canonical_payload();
    let sig = priv_key.sign(&payload);
    entity.set_signature(sig);
}

/// Attempts to repair a single field assuming it was produced by
/// reinterpreting UTF-8 bytes as Latin-1 code points. Returns `Some` only if
/// every code point is `<= 0xFF`, the recovered bytes are valid UTF-8, and
/// the result actually differs from the input.
fn try_latin1_repair(field: &str) -> Option<String> {
    if !field.chars().all(|c| (c as u32) <= 0xFF) {
        return None;
    }
    let bytes: Vec<u8> = field.chars().map(|c| c as u8).collect();
    match String::from_utf8(bytes) {
        Ok(repaired) if repaired != field => Some(repaired),
        _ => None,
    }
}

/// Verifies `entity`'s signature over its canonical payload. On failure,
/// if `policy` allows it, attempts the Latin-1 repair on every recoverable
/// text field and retries verification exactly once. Returns the (possibly
/// repaired) entity on success, along with whether a repair was applied.
pub fn verify_entity<T: SignedEntity + Clone>(
    entity: &T,
    policy: RecoveryPolicy,
) -> Result<(T, bool), BoardError> {
    let payload = entity.canonical_payload();
    if entity
        .author_pub_key()
        .verify(&payload, entity.signature())
        .is_ok()
    {
        return Ok((entity.clone(), false));
    }

    if policy == RecoveryPolicy::Disabled {
        return Err(BoardError::SignatureInvalid);
    }

    let mut repaired = entity.clone();
    let mut any_repaired = false;
    for field in repaired.recoverable_text_fields_mut() {
        if let Some(fixed) = try_latin1_repair(field) {
            *field = fixed;
            any_repaired = true;
        }
    }
    if !any_repaired {
        return Err(BoardError::SignatureInvalid);
    }

    let payload = repaired.canonical_payload();
    if repaired
        .author_pub_key()
        .verify(&payload, repaired.signature())
        .is_ok()
    {
        tracing::info!("Latin-1 recovery repaired and verified an entity");
        Ok((repaired, true))
    } else {
        Err(BoardError::SignatureInvalid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::{Body, Post};
    use crate::keys::PrivateKey;

    fn signed_post(sk: &PrivateKey, display_name: &str, content: &str) -> Post {
        let mut post = Post {
            thread_id: "thread1".into(),
            parent_post_cid: None,
            author_pub_key: sk.public_key(),
            display_name: display_name.to_string(),
            body: Body {
                format: "markdown".into(),
                content: content.to_string(),
            },
            created_at: "2026-01-01T00:00:00Z".into(),
            edited_at: None,
            meta: serde_json::Value::Null,
            attachments: vec![],
            signature: sk.sign(b"placeholder"),
        };
        sign_entity(sk, &mut post);
        post
    }

    #[test]
    fn verifies_untouched_entity() {
        let sk = PrivateKey::generate();
        let post = signed_post(&sk, "alice", "hello world");
        let (_, repaired) = verify_entity(&post, RecoveryPolicy::Enabled).unwrap();
        assert!(!repaired);
    }

    #[test]
    fn rejects_tampered_entity_even_with_recovery() {
        let sk = PrivateKey::generate();
        let mut post = signed_post(&sk, "alice", "hello world");
        post.display_name = "mallory".to_string();
        assert!(verify_entity(&post, RecoveryPolicy::Enabled).is_err());
    }

    #[test]
    fn latin1_mojibake_is_recovered() {
        let sk = PrivateKey::generate();
        // "café" signed, then corrupted the way a Latin-1 mis-decode would:
        // each UTF-8 byte of "é" (0xC3 0xA9) becomes its own Latin-1 code point.
        let original = signed_post(&sk, "caf\u{00e9}", "hello");
        let mut corrupted = original.clone();
        let mojibake: String = original.display_name.as_bytes().iter().map(|&b| b as char).collect();
        corrupted.display_name = mojibake;
        assert_ne!(corrupted.display_name, original.display_name);

        let (fixed, was_repaired) = verify_entity(&corrupted, RecoveryPolicy::Enabled).unwrap();
        assert!(was_repaired);
        assert_eq!(fixed.display_name, original.display_name);
    }

    #[test]
    fn recovery_disabled_rejects_mojibake() {
        let sk = PrivateKey::generate();
        let original = signed_post(&sk, "caf\u{00e9}", "hello");
        let mut corrupted = original.clone();
        corrupted.display_name = original
            .display_name
            .as_bytes()
            .iter()
            .map(|&b| b as char)
            .collect();
        assert!(verify_entity(&corrupted, RecoveryPolicy::Disabled).is_err());
    }
}

#[cfg(test)]
mod proptests {
    use proptest::prelude::*;

    use super::*;
    use crate::entities::{Body, Post};
    use crate::keys::PrivateKey;

    fn arb_text() -> impl Strategy<Value = String> {
        "[ -~]{0,40}"
    }

    proptest! {
        /// Any untampered post, for any author key and any printable-ASCII
        /// display name/content, signs and verifies without needing the
        /// Latin-1 recovery path.
        #[test]
        fn sign_then_verify_round_trips(display_name in arb_text(), content in arb_text()) {
            let sk = PrivateKey::generate();
            let mut post = Post {
                thread_id: "thread1".into(),
                parent_post_cid: None,
                author_pub_key: sk.public_key(),
                display_name,
                body: Body { format: "markdown".into(), content },
                created_at: "2026-01-01T00:00:00Z".into(),
                edited_at: None,
                meta: serde_json::Value::Null,
                attachments: vec![],
                signature: sk.sign(b"placeholder"),
            };
            sign_entity(&sk, &mut post);
            let (_, repaired) = verify_entity(&post, RecoveryPolicy::Enabled).unwrap();
            prop_assert!(!repaired);
        }

        /// Changing any signed field after signing always invalidates the
        /// signature, even with recovery enabled, unless the change happens
        /// to be exactly the Latin-1 repair of the original text.
        #[test]
        fn tampering_any_signed_field_is_detected(
            display_name in arb_text(),
            content in arb_text(),
            tamper in arb_text(),
        ) {
            let sk = PrivateKey::generate();
            let mut post = Post {
                thread_id: "thread1".into(),
                parent_post_cid: None,
                author_pub_key: sk.public_key(),
                display_name,
                body: Body { format: "markdown".into(), content },
                created_at: "2026-01-01T00:00:00Z".into(),
                edited_at: None,
                meta: serde_json::Value::Null,
                attachments: vec![],
                signature: sk.sign(b"placeholder"),
            };
            sign_entity(&sk, &mut post);
            prop_assume!(tamper != post.display_name);
            post.display_name = tamper;
            prop_assert!(verify_entity(&post, RecoveryPolicy::Enabled).is_err());
        }
    }
}
