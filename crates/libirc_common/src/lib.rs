//! Small types shared between the wire, client and runtime crates.
//!
//! The main export is [`ChanName`]/[`ChanNameRef`], an owned/borrowed pair (think
//! `String`/`str`) that remembers the channel name exactly as it appeared on the wire while
//! also giving callers a case-folded form to key maps and sets with. IRC channel names are
//! case-insensitive (with the usual `{}|^` <-> `[]\~` RFC 1459 casemapping wrinkles), so two
//! strings that look different can name the same channel.

use std::borrow::Borrow;
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::ops::Deref;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// An owned channel name, as seen on the wire (e.g. `"#haskell"`).
#[derive(Debug, Clone, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ChanName(String);

/// A borrowed channel name. `&ChanNameRef` is to [`ChanName`] what `&str` is to `String`.
#[derive(Debug, Eq)]
#[repr(transparent)]
pub struct ChanNameRef(str);

impl ChanName {
    pub fn new(s: String) -> ChanName {
        ChanName(s)
    }

    pub fn as_ref(&self) -> &ChanNameRef {
        ChanNameRef::new(&self.0)
    }

    pub fn display(&self) -> &str {
        &self.0
    }

    /// RFC 1459 casemapping, used to compare channel names for equality.
    pub fn normalized(&self) -> String {
        normalize(&self.0)
    }
}

impl ChanNameRef {
    pub fn new(s: &str) -> &ChanNameRef {
        // SAFETY: `ChanNameRef` is `#[repr(transparent)]` over `str`.
        unsafe { &*(s as *const str as *const ChanNameRef) }
    }

    pub fn display(&self) -> &str {
        &self.0
    }

    pub fn normalized(&self) -> String {
        normalize(&self.0)
    }

    pub fn to_owned(&self) -> ChanName {
        ChanName(self.0.to_owned())
    }
}

fn normalize(s: &str) -> String {
    s.chars()
        .map(|c| match c {
            'A'..='Z' => c.to_ascii_lowercase(),
            '[' => '{',
            ']' => '}',
            '\\' => '|',
            '~' => '^',
            other => other,
        })
        .collect()
}

impl Deref for ChanName {
    type Target = ChanNameRef;
    fn deref(&self) -> &ChanNameRef {
        self.as_ref()
    }
}

impl Borrow<ChanNameRef> for ChanName {
    fn borrow(&self) -> &ChanNameRef {
        self.as_ref()
    }
}

impl PartialEq for ChanName {
    fn eq(&self, other: &Self) -> bool {
        self.normalized() == other.normalized()
    }
}

impl PartialEq for ChanNameRef {
    fn eq(&self, other: &Self) -> bool {
        self.normalized() == other.normalized()
    }
}

impl PartialEq<ChanNameRef> for ChanName {
    fn eq(&self, other: &ChanNameRef) -> bool {
        self.normalized() == other.normalized()
    }
}

impl Hash for ChanName {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.normalized().hash(state)
    }
}

impl Hash for ChanNameRef {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.normalized().hash(state)
    }
}

impl Ord for ChanName {
    fn cmp(&self, other: &Self) -> Ordering {
        self.normalized().cmp(&other.normalized())
    }
}

impl PartialOrd for ChanName {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for ChanName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Display for ChanNameRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for ChanName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for ChanNameRef {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl<'a> From<&'a str> for ChanName {
    fn from(s: &'a str) -> ChanName {
        ChanName(s.to_owned())
    }
}

impl From<String> for ChanName {
    fn from(s: String) -> ChanName {
        ChanName(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chan_name_eq_is_case_insensitive() {
        let a = ChanName::new("#Haskell".to_owned());
        let b = ChanName::new("#haskell".to_owned());
        assert_eq!(a, b);
    }

    #[test]
    fn chan_name_ref_borrow_roundtrips() {
        let owned = ChanName::new("#rust".to_owned());
        let borrowed: &ChanNameRef = owned.as_ref();
        assert_eq!(borrowed.display(), "#rust");
        assert_eq!(borrowed.to_owned(), owned);
    }

    #[test]
    fn normalize_maps_rfc1459_casemapping_chars() {
        assert_eq!(normalize("{}|^"), "{}|^");
        assert_eq!(normalize("[]\\~"), "{}|^");
    }
}
