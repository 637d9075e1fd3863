//! Editing of the fleetbench block inside a CoreDNS Corefile
//!
//! The federation stanza lives between two marker comments so it can be
//! replaced or removed without touching anything the cluster operator wrote.

use fleetbench_common::{Error, Result};

/// Opening marker of the managed block
pub const BEGIN_MARKER: &str = "# fleetbench-federation:begin";
/// Closing marker of the managed block
pub const END_MARKER: &str = "# fleetbench-federation:end";

/// Settings rendered into the federation stanza
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Stanza {
    /// Federated zones (e.g. "global")
    pub domains: Vec<String>,
    /// Upstream nameservers serving the federated zones
    pub nameservers: Vec<String>,
    /// Cache TTL in seconds
    pub cache_seconds: u32,
}

impl Stanza {
    /// Render the managed block including markers
    pub fn render(&self) -> String {
        let mut out = String::new();
        out.push_str(BEGIN_MARKER);
        out.push('\n');
        out.push_str(&self.domains.join(" "));
        out.push_str(":53 {\n    errors\n");
        out.push_str(&format!("    cache {}\n", self.cache_seconds));
        out.push_str(&format!("    forward . {}\n", self.nameservers.join(" ")));
        out.push_str("}\n");
        out.push_str(END_MARKER);
        out.push('\n');
        out
    }
}

/// Location of the managed block, as line indices (inclusive)
fn find_block(corefile: &str) -> Result<Option<(usize, usize)>> {
    let mut begin = None;
    let mut end = None;
    for (i, line) in corefile.lines().enumerate() {
        match line.trim() {
            BEGIN_MARKER if begin.is_some() => {
                return Err(Error::serialization("Corefile contains duplicate begin markers"))
            }
            BEGIN_MARKER => begin = Some(i),
            END_MARKER if end.is_some() => {
                return Err(Error::serialization("Corefile contains duplicate end markers"))
            }
            END_MARKER => end = Some(i),
            _ => {}
        }
    }
    match (begin, end) {
        (None, None) => Ok(None),
        (Some(b), Some(e)) if b < e => Ok(Some((b, e))),
        (Some(_), None) => Err(Error::serialization(
            "Corefile contains an unterminated fleetbench block",
        )),
        _ => Err(Error::serialization(
            "Corefile contains a fleetbench end marker without a matching begin",
        )),
    }
}

/// Whether the Corefile carries a well-formed managed block
pub fn contains_stanza(corefile: &str) -> Result<bool> {
    Ok(find_block(corefile)?.is_some())
}

/// Insert or replace the managed block
///
/// The block goes in front of the operator's content, which is kept byte for
/// byte so that [`remove`] restores it exactly.
pub fn upsert(corefile: &str, stanza: &Stanza) -> Result<String> {
    let base = remove(corefile)?;
    Ok(format!("{}{base}", stanza.render()))
}

/// Remove exactly the managed block; a Corefile without one is returned unchanged
pub fn remove(corefile: &str) -> Result<String> {
    let Some((begin, end)) = find_block(corefile)? else {
        return Ok(corefile.to_string());
    };
    Ok(corefile
        .split_inclusive('\n')
        .enumerate()
        .filter(|(i, _)| *i < begin || *i > end)
        .map(|(_, line)| line)
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    const BASE: &str = ".:53 {\n    errors\n    forward . /etc/resolv.conf\n}\n";

    fn stanza() -> Stanza {
        Stanza {
            domains: vec!["global".into()],
            nameservers: vec!["10.96.0.10".into(), "10.97.0.10".into()],
            cache_seconds: 30,
        }
    }

    #[test]
    fn upsert_then_remove_restores_the_original() {
        let with = upsert(BASE, &stanza()).unwrap();
        assert!(with.ends_with(BASE));
        assert!(with.contains("global:53 {"));
        assert!(with.contains("forward . 10.96.0.10 10.97.0.10"));
        assert!(contains_stanza(&with).unwrap());

        assert_eq!(remove(&with).unwrap(), BASE);
    }

    #[test]
    fn upsert_replaces_an_existing_block() {
        let once = upsert(BASE, &stanza()).unwrap();
        let mut changed = stanza();
        changed.cache_seconds = 5;
        let twice = upsert(&once, &changed).unwrap();
        assert_eq!(twice.matches(BEGIN_MARKER).count(), 1);
        assert!(twice.contains("cache 5"));
        assert!(!twice.contains("cache 30"));
    }

    #[test]
    fn operator_content_after_the_block_survives_removal() {
        let corefile = format!("{BASE}{}example.org:53 {{\n    forward . 8.8.8.8\n}}\n", stanza().render());
        let removed = remove(&corefile).unwrap();
        assert!(removed.contains("example.org:53"));
        assert!(!removed.contains(BEGIN_MARKER));
    }

    #[test]
    fn malformed_markers_are_errors() {
        let unterminated = format!("{BASE}{BEGIN_MARKER}\nglobal:53 {{}}\n");
        assert!(remove(&unterminated).is_err());
        assert!(upsert(&unterminated, &stanza()).is_err());

        let duplicated = format!("{}{}", stanza().render(), stanza().render());
        assert!(remove(&duplicated).is_err());

        let reversed = format!("{END_MARKER}\n{BEGIN_MARKER}\n");
        assert!(contains_stanza(&reversed).is_err());
    }

    #[test]
    fn operator_whitespace_is_restored_exactly() {
        for original in [
            ".:53 {\n    errors\n}",
            ".:53 {\n    errors\n}\n\n\n",
            ".:53 {\r\n    errors\r\n}\r\n",
            "",
        ] {
            let with = upsert(original, &stanza()).unwrap();
            assert!(contains_stanza(&with).unwrap());
            assert_eq!(remove(&with).unwrap(), original, "original: {original:?}");
        }
    }

    #[test]
    fn removing_from_a_clean_corefile_is_a_no_op() {
        assert_eq!(remove(BASE).unwrap(), BASE);
        assert!(!contains_stanza(BASE).unwrap());
    }
}
