//! URL codecs understood by the rewriting engines' service workers.

use crate::config::CodecKind;
use crate::search::encode_component;

/// Encode a destination URL for embedding in a proxied path.
pub fn encode_url(kind: CodecKind, url: &str) -> String {
    match kind {
        CodecKind::Xor => encode_component(&xor(url)),
        CodecKind::Plain => encode_component(url),
    }
}

/// Flip bit 1 of every odd-indexed character.
///
/// Indexing is per `char`, which agrees with the engines' UTF-16 indexing for
/// the BMP; URLs reaching this point are ASCII after URL parsing anyway.
fn xor(input: &str) -> String {
    input
        .chars()
        .enumerate()
        .map(|(i, c)| {
            if i % 2 == 1 {
                char::from_u32(c as u32 ^ 2).unwrap_or(c)
            } else {
                c
            }
        })
        .collect()
}
