//! Key/value pairs inherited by every descendant of the span they were set on.
//!
//! Baggage travels inside a [`Context`](crate::Context) and, across process
//! boundaries, inside the `tracestate` header. The ids CozeLoop itself
//! propagates are available as [`USER_ID`], [`MESSAGE_ID`] and
//! [`THREAD_ID`].
use std::collections::btree_map::{self, Entry};
use std::collections::BTreeMap;
use std::fmt;
use std::iter::FromIterator;

/// Baggage key of the end user a trace acts for.
pub const USER_ID: &str = "user_id";
/// Baggage key of the chat message a trace handles.
pub const MESSAGE_ID: &str = "message_id";
/// Baggage key of the conversation thread a trace belongs to.
pub const THREAD_ID: &str = "thread_id";

const MAX_KEY_VALUE_PAIRS: usize = 64;
const MAX_LEN_OF_ALL_PAIRS: usize = 8192;

// https://datatracker.ietf.org/doc/html/rfc7230#section-3.2.6
const INVALID_ASCII_KEY_CHARS: [u8; 17] = [
    b'(', b')', b',', b'/', b':', b';', b'<', b'=', b'>', b'?', b'@', b'[', b'\\', b']', b'{',
    b'}', b'"',
];

/// An ordered set of name/value pairs.
///
/// ### Names
///
/// * ASCII strings according to the token format, defined in [RFC2616, Section 2.2]
///
/// ### Values
///
/// * UTF-8 strings. They are percent-encoded when written to a carrier.
///
/// ### Limits
///
/// * Maximum number of name/value pairs: `64`.
/// * Maximum total length of all name/value pairs: `8192`.
///
/// Inserts that would break a limit, or that use an invalid name, are
/// ignored.
///
/// [RFC2616, Section 2.2]: https://tools.ietf.org/html/rfc2616#section-2.2
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Baggage {
    inner: BTreeMap<String, String>,
    kv_content_len: usize,
}

impl Baggage {
    /// Creates an empty `Baggage`.
    pub fn new() -> Self {
        Baggage::default()
    }

    /// Returns the value associated with a given name
    ///
    /// # Examples
    ///
    /// ```
    /// use cozeloop::baggage::Baggage;
    ///
    /// let mut baggage = Baggage::new();
    /// let _ = baggage.insert("thread_id", "t-9");
    ///
    /// assert_eq!(baggage.get("thread_id"), Some("t-9"))
    /// ```
    pub fn get<K: AsRef<str>>(&self, key: K) -> Option<&str> {
        self.inner.get(key.as_ref()).map(String::as_str)
    }

    /// Inserts a name/value pair into the baggage.
    ///
    /// If the name was not present, [`None`] is returned. If the name was
    /// present, the value is updated and the old value is returned. Pairs
    /// rejected by the limits leave the baggage untouched and return [`None`].
    pub fn insert<K, V>(&mut self, key: K, value: V) -> Option<String>
    where
        K: Into<String>,
        V: Into<String>,
    {
        let (key, value) = (key.into(), value.into());
        let entries_count = self.inner.len();
        match self.inner.entry(key) {
            Entry::Occupied(mut occupied_entry) => {
                let entry_content_len = occupied_entry.key().len() + value.len();
                let prev_content_len = occupied_entry.key().len() + occupied_entry.get().len();
                let new_content_len = self.kv_content_len + entry_content_len - prev_content_len;
                if new_content_len > MAX_LEN_OF_ALL_PAIRS {
                    return None;
                }
                self.kv_content_len = new_content_len;
                Some(occupied_entry.insert(value))
            }
            Entry::Vacant(vacant_entry) => {
                if !Self::is_key_valid(vacant_entry.key().as_bytes()) {
                    return None;
                }
                if entries_count == MAX_KEY_VALUE_PAIRS {
                    return None;
                }
                let new_content_len = self.kv_content_len + vacant_entry.key().len() + value.len();
                if new_content_len > MAX_LEN_OF_ALL_PAIRS {
                    return None;
                }
                self.kv_content_len = new_content_len;
                vacant_entry.insert(value);
                None
            }
        }
    }

    /// Removes a name from the baggage, returning the value
    /// corresponding to the name if the pair was previously in the map.
    pub fn remove<K: AsRef<str>>(&mut self, key: K) -> Option<String> {
        let removed = self.inner.remove_entry(key.as_ref());
        if let Some((k, v)) = &removed {
            self.kv_content_len -= k.len() + v.len();
        }
        removed.map(|(_, v)| v)
    }

    /// Returns the number of pairs in this baggage
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    /// Returns `true` if the baggage contains no items.
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Gets an iterator over the baggage items, ordered by name.
    pub fn iter(&self) -> Iter<'_> {
        Iter(self.inner.iter())
    }

    fn is_key_valid(key: &[u8]) -> bool {
        !key.is_empty()
            && key
                .iter()
                .all(|b| b.is_ascii_graphic() && !INVALID_ASCII_KEY_CHARS.contains(b))
    }
}

impl fmt::Debug for Baggage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.inner.iter()).finish()
    }
}

/// An iterator over the entries of a [`Baggage`].
#[derive(Debug)]
pub struct Iter<'a>(btree_map::Iter<'a, String, String>);

impl<'a> Iterator for Iter<'a> {
    type Item = (&'a str, &'a str);

    fn next(&mut self) -> Option<Self::Item> {
        self.0.next().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl<'a> IntoIterator for &'a Baggage {
    type Item = (&'a str, &'a str);
    type IntoIter = Iter<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

impl<K, V> FromIterator<(K, V)> for Baggage
where
    K: Into<String>,
    V: Into<String>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut baggage = Baggage::default();
        for (key, value) in iter.into_iter() {
            baggage.insert(key, value);
        }
        baggage
    }
}

impl<K, V> Extend<(K, V)> for Baggage
where
    K: Into<String>,
    V: Into<String>,
{
    fn extend<I: IntoIterator<Item = (K, V)>>(&mut self, iter: I) {
        for (key, value) in iter {
            self.insert(key, value);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_non_reserved_ascii_keys() {
        let mut baggage = Baggage::new();
        assert_eq!(baggage.insert(USER_ID, "u-1"), None);
        assert_eq!(baggage.insert("bad key", "v"), None);
        assert_eq!(baggage.insert("bad=key", "v"), None);
        assert_eq!(baggage.len(), 1);
        assert_eq!(baggage.insert(USER_ID, "u-2"), Some("u-1".to_string()));
        assert_eq!(baggage.get(USER_ID), Some("u-2"));
    }

    #[test]
    fn insert_too_much_baggage() {
        let over_limit = MAX_KEY_VALUE_PAIRS + 1;
        let baggage = (0..over_limit)
            .map(|i| (format!("key{i}"), format!("value{i}")))
            .collect::<Baggage>();
        assert_eq!(baggage.len(), MAX_KEY_VALUE_PAIRS)
    }

    #[test]
    fn insert_pairs_length_exceed() {
        let big = "x".repeat(MAX_LEN_OF_ALL_PAIRS / 3);
        let baggage = ["a", "b", "c", "d"]
            .into_iter()
            .map(|k| (k, big.clone()))
            .collect::<Baggage>();
        assert_eq!(baggage.len(), 2)
    }

    #[test]
    fn remove_releases_budget() {
        let big = "x".repeat(MAX_LEN_OF_ALL_PAIRS - 1);
        let mut baggage = Baggage::new();
        baggage.insert("a", big.clone());
        assert_eq!(baggage.insert("b", "y"), None);
        assert_eq!(baggage.get("b"), None);
        assert_eq!(baggage.remove("a"), Some(big));
        baggage.insert("b", "y");
        assert_eq!(baggage.get("b"), Some("y"));
    }

    #[test]
    fn iterates_in_key_order() {
        let baggage: Baggage = [(THREAD_ID, "t"), (MESSAGE_ID, "m"), (USER_ID, "u")]
            .into_iter()
            .collect();
        let keys: Vec<_> = baggage.iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec![MESSAGE_ID, THREAD_ID, USER_ID]);
    }
}
