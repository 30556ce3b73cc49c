//! The `gzip` processing step: stored bytes are gzip-compressed canonical bytes.

use std::io::{self, Read, Seek, SeekFrom, Write};

use depot_schema::{Status, StatusCode};
use flate2::read::GzDecoder;
use tempfile::SpooledTempFile;

use super::Stage;

/// Processor id of the gzip step.
pub const GZIP_PROCESSOR: &str = "gzip";

/// Buffered in memory up to this size, then spilled to disk.
const SPOOL_LIMIT: usize = 4 * 1024 * 1024;

/// Collects the compressed stream and decodes it into the next stage on close.
pub(super) struct GzipStage<'a> {
    spool: SpooledTempFile,
    next: Box<dyn Stage + 'a>,
}

impl<'a> GzipStage<'a> {
    pub(super) fn boxed(next: Box<dyn Stage + 'a>) -> Box<dyn Stage + 'a> {
        Box::new(Self {
            spool: SpooledTempFile::new(SPOOL_LIMIT),
            next,
        })
    }
}

impl Write for GzipStage<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.spool.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Stage for GzipStage<'_> {
    fn close(self: Box<Self>) -> io::Result<Vec<Status>> {
        let Self { mut spool, mut next } = *self;
        spool.seek(SeekFrom::Start(0))?;

        let own = decode_into(spool, &mut *next)?;
        let mut statuses = vec![own];
        statuses.extend(next.close()?);
        Ok(statuses)
    }
}

/// Decode errors become an artifact-processing status; sink errors propagate.
fn decode_into(spool: SpooledTempFile, next: &mut (dyn Stage + '_)) -> io::Result<Status> {
    let mut decoder = GzDecoder::new(spool);
    let mut buf = [0u8; 16 * 1024];
    loop {
        let n = match decoder.read(&mut buf) {
            Ok(0) => return Ok(Status::ok()),
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => {
                return Ok(Status::error(
                    StatusCode::ArtifactProcessing,
                    format!("Failed to decompress gzip content: {e}"),
                ));
            }
        };
        next.write_all(&buf[..n])?;
    }
}

#[cfg(test)]
mod tests {
    use super::super::{Pipeline, StageSpec};
    use depot_schema::ProcessingStepDescriptor;
    use flate2::Compression;
    use flate2::write::GzEncoder;
    use std::io::Write;

    fn gzip(data: &[u8]) -> Vec<u8> {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(data).unwrap();
        encoder.finish().unwrap()
    }

    fn step() -> Vec<StageSpec> {
        vec![StageSpec::Process(ProcessingStepDescriptor::new(
            super::GZIP_PROCESSOR,
            None,
            true,
        ))]
    }

    #[test]
    fn decodes_into_sink() {
        let compressed = gzip(b"canonical bytes");
        let mut out = Vec::new();
        let mut pipeline = Pipeline::build(step(), &mut out);
        for chunk in compressed.chunks(3) {
            pipeline.write_all(chunk).unwrap();
        }
        let outcome = pipeline.close().unwrap();
        assert!(outcome.status.is_ok());
        assert_eq!(out, b"canonical bytes");
    }

    #[test]
    fn corrupt_input_is_an_artifact_error() {
        let mut out = Vec::new();
        let mut pipeline = Pipeline::build(step(), &mut out);
        pipeline.write_all(b"definitely not gzip").unwrap();
        let outcome = pipeline.close().unwrap();
        assert!(depot_schema::artifact_error(&outcome.status));
    }
}
