//! Fixtures shared by the benchmarks.

pub const BOUNDARY: &str = "---------------------------114772229410704779042051621609";

#[derive(Debug, Clone)]
pub struct TestCase {
    name: &'static str,
    group: TestGroup,
    file: TestFile,
}

impl TestCase {
    pub fn new(name: &'static str, group: TestGroup, file: TestFile) -> Self {
        Self { name, group, file }
    }

    pub fn small(name: &'static str, file: TestFile) -> Self {
        Self::new(name, TestGroup::Small, file)
    }

    pub fn normal(name: &'static str, file: TestFile) -> Self {
        Self::new(name, TestGroup::Normal, file)
    }

    pub fn large(name: &'static str, file: TestFile) -> Self {
        Self::new(name, TestGroup::Large, file)
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn group(&self) -> TestGroup {
        self.group
    }

    pub fn file(&self) -> &TestFile {
        &self.file
    }
}

/// A generated request body and the content type it is sent with.
#[derive(Debug, Clone)]
pub struct TestFile {
    content_type: String,
    content: Vec<u8>,
}

impl TestFile {
    pub fn new(content_type: impl Into<String>, content: Vec<u8>) -> Self {
        Self { content_type: content_type.into(), content }
    }

    /// A `multipart/form-data` body with `fields` text fields and `files`
    /// binary files of `file_size` bytes each.
    pub fn multipart(fields: usize, files: usize, file_size: usize) -> Self {
        let mut content = Vec::new();
        for i in 0..fields {
            content.extend_from_slice(
                format!("--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"field{i}\"\r\n\r\nvalue {i}\r\n").as_bytes(),
            );
        }
        for i in 0..files {
            content.extend_from_slice(
                format!(
                    "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"files[]\"; filename=\"file{i}.bin\"\r\n\
                     Content-Type: application/octet-stream\r\n\r\n"
                )
                .as_bytes(),
            );
            content.extend((0..file_size).map(|b| (b % 251) as u8));
            content.extend_from_slice(b"\r\n");
        }
        content.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());

        Self::new(format!("multipart/form-data; boundary={BOUNDARY}"), content)
    }

    /// An HTML5 `text/plain` form body with nested bracket names.
    pub fn plain_form(rows: usize) -> Self {
        let mut content = String::new();
        for i in 0..rows {
            content.push_str(&format!("rows[{i}][id]={i}\r\nrows[{i}][name]=name {i}\r\ntags[]=tag{i}\r\n"));
        }
        Self::new("text/plain", content.into_bytes())
    }

    pub fn content_type(&self) -> &str {
        &self.content_type
    }

    pub fn content(&self) -> &[u8] {
        &self.content
    }
}

#[derive(Clone, Copy, Debug)]
pub enum TestGroup {
    Small,
    Normal,
    Large,
}
