//! Path-generation VM.
//!
//! Each path-rep record points at a byte program: 32-bit little-endian
//! command words interleaved with NUL-terminated UTF-8 fragments. The VM
//! alternates between two phases. In the **template** phase commands grow a
//! table of base strings; in the **generation** phase they emit finished
//! paths built from those bases.
//!
//! A zero command toggles the phase, clearing the base table on entry into
//! template. A non-zero command `c` reads the following fragment `f` and
//! forms `bases[c - 1] ++ f`, or `f` alone when `c - 1` is out of range;
//! the result is appended to the bases (template) or the output
//! (generation). Commands are one-based: `1` names the first base.
//!
//! Programs start in the generation phase and always open with a `0`
//! toggle; a leading fragment command is rejected. The template section may
//! be empty (`0 0`), typically to emit a single string verbatim.

use crate::reader::{Reader, Truncated};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PathError {
    /// A command word or fragment ran past the end of the program.
    #[error(transparent)]
    Truncated(#[from] Truncated),
    #[error("path fragment is not valid UTF-8: {0}")]
    BadFragment(#[from] std::str::Utf8Error),
    /// The program did not open with a phase toggle.
    #[error("path program starts with fragment command {0}")]
    LeadingFragment(u32),
}

/// Run a path program to completion, returning every generated path in
/// emission order.
pub fn generate_paths(program: &[u8]) -> Result<Vec<String>, PathError> {
    let mut r = Reader::new(program);
    let mut bases: Vec<String> = Vec::new();
    let mut results = Vec::new();
    let mut template = false;
    let mut first = true;

    while !r.is_empty() {
        let cmd = r.read_u32()?;
        if first {
            if cmd != 0 {
                return Err(PathError::LeadingFragment(cmd));
            }
            first = false;
        }

        if cmd == 0 {
            template = !template;
            if template {
                bases.clear();
            }
            continue;
        }

        let fragment = std::str::from_utf8(r.read_cstr()?)?;
        let index = (cmd - 1) as usize;
        let full = match bases.get(index) {
            Some(base) => {
                let mut s = String::with_capacity(base.len() + fragment.len());
                s.push_str(base);
                s.push_str(fragment);
                s
            }
            None => fragment.to_owned(),
        };

        if template {
            bases.push(full);
        } else {
            results.push(full);
        }
    }

    Ok(results)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn cmd(program: &mut Vec<u8>, word: u32) {
        program.extend_from_slice(&word.to_le_bytes());
    }

    fn frag(program: &mut Vec<u8>, s: &str) {
        program.extend_from_slice(s.as_bytes());
        program.push(0);
    }

    #[test]
    fn single_base_single_output() {
        let mut p = Vec::new();
        cmd(&mut p, 0);
        cmd(&mut p, 1);
        frag(&mut p, "foo/");
        cmd(&mut p, 0);
        cmd(&mut p, 1);
        frag(&mut p, "bar.txt");
        assert_eq!(generate_paths(&p).unwrap(), vec!["foo/bar.txt"]);
    }

    #[test]
    fn reentering_template_clears_bases() {
        let mut p = Vec::new();
        cmd(&mut p, 0);
        cmd(&mut p, 1);
        frag(&mut p, "a/");
        cmd(&mut p, 0);
        cmd(&mut p, 1);
        frag(&mut p, "x");
        cmd(&mut p, 1);
        frag(&mut p, "y");
        cmd(&mut p, 0);
        cmd(&mut p, 0);
        assert_eq!(generate_paths(&p).unwrap(), vec!["a/x", "a/y"]);
    }

    #[test]
    fn empty_template_section() {
        let mut p = Vec::new();
        cmd(&mut p, 0);
        cmd(&mut p, 0);
        assert_eq!(generate_paths(&p).unwrap(), Vec::<String>::new());
    }

    #[test]
    fn out_of_range_index_emits_fragment_verbatim() {
        let mut p = Vec::new();
        cmd(&mut p, 0);
        cmd(&mut p, 0);
        cmd(&mut p, 9);
        frag(&mut p, "orphan.dat");
        assert_eq!(generate_paths(&p).unwrap(), vec!["orphan.dat"]);
    }

    #[test]
    fn bases_may_reference_earlier_bases() {
        let mut p = Vec::new();
        cmd(&mut p, 0);
        cmd(&mut p, 1);
        frag(&mut p, "art/");
        cmd(&mut p, 1);
        frag(&mut p, "textures/");
        cmd(&mut p, 0);
        cmd(&mut p, 2);
        frag(&mut p, "stone.dds");
        assert_eq!(generate_paths(&p).unwrap(), vec!["art/textures/stone.dds"]);
    }

    #[test]
    fn leading_fragment_command_is_rejected() {
        let mut p = Vec::new();
        cmd(&mut p, 1);
        frag(&mut p, "oops");
        assert!(matches!(generate_paths(&p), Err(PathError::LeadingFragment(1))));
    }

    #[test]
    fn truncated_command_fails() {
        let mut p = Vec::new();
        cmd(&mut p, 0);
        p.extend_from_slice(&[1, 0]); // half a command word
        assert!(matches!(generate_paths(&p), Err(PathError::Truncated(_))));
    }

    #[test]
    fn unterminated_fragment_fails() {
        let mut p = Vec::new();
        cmd(&mut p, 0);
        cmd(&mut p, 1);
        p.extend_from_slice(b"no-nul");
        assert!(matches!(generate_paths(&p), Err(PathError::Truncated(_))));
    }

    proptest! {
        #[test]
        fn vm_is_deterministic(bytes in proptest::collection::vec(any::<u8>(), 0..512)) {
            let a = generate_paths(&bytes);
            let b = generate_paths(&bytes);
            prop_assert_eq!(a.is_err(), b.is_err());
            prop_assert_eq!(a.ok(), b.ok());
        }
    }
}
