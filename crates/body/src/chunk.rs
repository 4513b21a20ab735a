use bytes::{Bytes, BytesMut};

/// One unit of body data as seen by the materializer and its consumers.
///
/// A body read through a character decoder produces `Text` chunks, any other
/// body produces `Binary` chunks. Every consumer of one body receives the
/// same variant for every chunk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Chunk {
    Binary(Bytes),
    Text(String),
}

impl Chunk {
    #[inline]
    pub fn len(&self) -> usize {
        match self {
            Chunk::Binary(bytes) => bytes.len(),
            Chunk::Text(text) => text.len(),
        }
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Chunk::Binary(bytes) => bytes,
            Chunk::Text(text) => text.as_bytes(),
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Chunk::Text(text) => Some(text),
            Chunk::Binary(_) => None,
        }
    }
}

/// The fully materialized body, before any content-type specific decoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RawBody {
    /// The body went through a character decoder.
    Text(String),
    /// The body bytes as they came out of the last pipeline stage.
    Binary(Bytes),
}

impl RawBody {
    /// Concatenates accumulated chunks into one value.
    ///
    /// `text` selects the variant; it is true when a character decoder was
    /// active, in which case every chunk is a `Chunk::Text`.
    pub fn concat(chunks: &[Chunk], text: bool) -> Self {
        if text {
            let mut out = String::with_capacity(chunks.iter().map(Chunk::len).sum());
            for chunk in chunks {
                if let Chunk::Text(s) = chunk {
                    out.push_str(s);
                }
            }
            return RawBody::Text(out);
        }

        match chunks {
            [] => RawBody::Binary(Bytes::new()),
            [Chunk::Binary(only)] => RawBody::Binary(only.clone()),
            _ => {
                let mut buf = BytesMut::with_capacity(chunks.iter().map(Chunk::len).sum());
                for chunk in chunks {
                    buf.extend_from_slice(chunk.as_bytes());
                }
                RawBody::Binary(buf.freeze())
            }
        }
    }

    pub fn len(&self) -> usize {
        match self {
            RawBody::Text(text) => text.len(),
            RawBody::Binary(bytes) => bytes.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn as_bytes(&self) -> &[u8] {
        match self {
            RawBody::Text(text) => text.as_bytes(),
            RawBody::Binary(bytes) => bytes,
        }
    }

    pub fn into_bytes(self) -> Bytes {
        match self {
            RawBody::Text(text) => Bytes::from(text),
            RawBody::Binary(bytes) => bytes,
        }
    }
}

impl From<String> for RawBody {
    fn from(value: String) -> Self {
        RawBody::Text(value)
    }
}

impl From<Bytes> for RawBody {
    fn from(value: Bytes) -> Self {
        RawBody::Binary(value)
    }
}

impl From<&'static str> for RawBody {
    fn from(value: &'static str) -> Self {
        RawBody::Text(value.to_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn concat_binary_chunks() {
        let chunks = vec![Chunk::Binary(Bytes::from_static(b"Test")), Chunk::Binary(Bytes::from_static(b" - OK"))];
        assert_eq!(RawBody::concat(&chunks, false), RawBody::Binary(Bytes::from_static(b"Test - OK")));
    }

    #[test]
    fn concat_text_chunks() {
        let chunks = vec![Chunk::Text("R".into()), Chunk::Text("ếver".into())];
        assert_eq!(RawBody::concat(&chunks, true), RawBody::Text("Rếver".into()));
    }

    #[test]
    fn concat_nothing() {
        assert!(RawBody::concat(&[], false).is_empty());
        assert_eq!(RawBody::concat(&[], true), RawBody::Text(String::new()));
    }
}
