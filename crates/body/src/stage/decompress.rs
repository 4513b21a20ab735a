use crate::ContentError;
use crate::stage::{Emit, Transform};
use bytes::{Bytes, BytesMut};
use flate2::write::{GzDecoder, ZlibDecoder};
use std::io;
use std::io::Write;
use tracing::trace;
use zstd::stream::write::Decoder as ZstdDecoder;

// inspired by the response encoder of actix-http, run the other way around

/// Compressed bytes handed to a decoder per step. Together with the internal
/// buffers of the decoders this bounds the output of a single step.
const INPUT_STEP: usize = 1024;

/// Collects whatever the wrapped decoder writes out.
#[derive(Debug)]
pub struct Writer {
    buf: BytesMut,
}

impl Writer {
    fn new() -> Self {
        Self { buf: BytesMut::with_capacity(4096) }
    }

    fn take(&mut self) -> Bytes {
        self.buf.split().freeze()
    }
}

impl io::Write for Writer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.buf.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// A decompression stage for one `Content-Encoding` token.
pub enum Decompressor {
    /// `gzip` / `x-gzip`
    Gzip(GzDecoder<Writer>),
    /// `deflate`, a zlib wrapped deflate stream.
    Deflate(ZlibDecoder<Writer>),
    /// `zstd`
    Zstd(ZstdDecoder<'static, Writer>),
    /// `br`
    Br(Box<brotli::DecompressorWriter<Writer>>),
    /// Already finished, only reachable after `flush`.
    Done,
}

impl std::fmt::Debug for Decompressor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Decompressor").field(&self.name()).finish()
    }
}

impl Decompressor {
    pub fn gzip() -> Self {
        Self::Gzip(GzDecoder::new(Writer::new()))
    }

    pub fn deflate() -> Self {
        Self::Deflate(ZlibDecoder::new(Writer::new()))
    }

    pub fn zstd() -> Result<Self, ContentError> {
        ZstdDecoder::new(Writer::new()).map(Self::Zstd).map_err(ContentError::decompress)
    }

    pub fn br() -> Self {
        Self::Br(Box::new(brotli::DecompressorWriter::new(
            Writer::new(),
            32 * 1024, // 32 KiB buffer
        )))
    }

    /// Builds the built-in stage for a lowercased encoding token.
    pub fn for_encoding(encoding: &str) -> Option<Result<Self, ContentError>> {
        match encoding {
            "gzip" | "x-gzip" => Some(Ok(Self::gzip())),
            "deflate" => Some(Ok(Self::deflate())),
            "br" => Some(Ok(Self::br())),
            "zstd" => Some(Self::zstd()),
            _ => None,
        }
    }

    /// Writes part of `data`, returning how much was consumed. Unlike
    /// `write_all` a single call only decodes what fits the decoder buffers.
    fn write(&mut self, data: &[u8]) -> Result<usize, io::Error> {
        let result = match self {
            Self::Gzip(decoder) => decoder.write(data),
            Self::Deflate(decoder) => decoder.write(data),
            Self::Zstd(decoder) => decoder.write(data),
            Self::Br(decoder) => decoder.write(data),
            Self::Done => Err(io::Error::other("write after end of compressed stream")),
        };
        if let Err(err) = &result {
            trace!("Error decoding {} encoding: {}", self.name(), err);
        }
        result
    }

    fn take(&mut self) -> Bytes {
        match self {
            Self::Gzip(decoder) => decoder.get_mut().take(),
            Self::Deflate(decoder) => decoder.get_mut().take(),
            Self::Zstd(decoder) => decoder.get_mut().take(),
            Self::Br(decoder) => decoder.get_mut().take(),
            Self::Done => Bytes::new(),
        }
    }

    fn finish(self) -> Result<Bytes, io::Error> {
        match self {
            Self::Gzip(decoder) => decoder.finish().map(|mut writer| writer.take()),
            Self::Deflate(decoder) => decoder.finish().map(|mut writer| writer.take()),
            Self::Zstd(mut decoder) => {
                decoder.flush()?;
                Ok(decoder.into_inner().take())
            }
            Self::Br(mut decoder) => {
                decoder.close()?;
                match decoder.into_inner() {
                    Ok(mut writer) => Ok(writer.take()),
                    Err(_) => Err(io::Error::new(io::ErrorKind::UnexpectedEof, "truncated brotli stream")),
                }
            }
            Self::Done => Ok(Bytes::new()),
        }
    }
}

impl Transform for Decompressor {
    fn transform(&mut self, chunk: Bytes) -> Result<Option<Bytes>, ContentError> {
        let mut out = BytesMut::new();
        self.transform_into(chunk, &mut |bytes| {
            out.extend_from_slice(&bytes);
            Ok(())
        })?;
        Ok(if out.is_empty() { None } else { Some(out.freeze()) })
    }

    fn flush(&mut self) -> Result<Option<Bytes>, ContentError> {
        let decompressor = std::mem::replace(self, Self::Done);
        let bytes = decompressor.finish().map_err(|e| {
            trace!("Error finishing compressed stream: {}", e);
            ContentError::decompress(e)
        })?;
        Ok(if bytes.is_empty() { None } else { Some(bytes) })
    }

    /// Emits the decoded bytes step by step, so a ceiling placed after this
    /// stage fails before the whole chunk is inflated.
    fn transform_into(&mut self, chunk: Bytes, emit: Emit<'_>) -> Result<(), ContentError> {
        let mut input = &chunk[..];
        while !input.is_empty() {
            let step = input.len().min(INPUT_STEP);
            let written = self.write(&input[..step]).map_err(ContentError::decompress)?;

            let bytes = self.take();
            if !bytes.is_empty() {
                emit(bytes)?;
            }

            if written == 0 {
                trace!(left = input.len(), "ignore data after end of {} stream", self.name());
                break;
            }
            input = &input[written..];
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        match self {
            Self::Gzip(_) => "gzip",
            Self::Deflate(_) => "deflate",
            Self::Zstd(_) => "zstd",
            Self::Br(_) => "br",
            Self::Done => "done",
        }
    }
}
