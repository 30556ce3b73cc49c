//! Streaming verification pipeline.
//!
//! A pipeline is an ordered list of [`StageSpec`]s, outermost first, composed
//! by [`Pipeline::build`] into a single writer in front of the caller's sink.
//! Every stage passes bytes on as they arrive; on [`Pipeline::close`] each
//! stage finalizes and reports a [`Status`]. All outcomes are collected, none
//! short-circuits. Only I/O errors from the sink abort the close.
//!
//! Stage order for a canonical fetch:
//!
//! 1. zip-structure check (when the stored bytes are declared as zip)
//! 2. one verifier per `download.checksum.*`
//! 3. the descriptor's processing steps, in order
//! 4. one verifier per `artifact.checksum.*`
//! 5. the Ed25519 signature verifier (non-folder artifacts that carry one)
//! 6. the trust policy
//!
//! A raw fetch stops after step 2.

mod gzip;
mod stages;

use std::io::{self, Write};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use depot_schema::{
    ArtifactDescriptor, Checksum, ProcessingStepDescriptor, Status, StatusCode, props,
};

use crate::config::EngineConfig;

pub use gzip::GZIP_PROCESSOR;
pub use stages::{
    ChecksumVerifier, NoticeVerifier, SignatureVerifier, TrustPolicyVerifier, Verifier,
    ZipStructureVerifier, parse_trusted_keys,
};

/// Which representation of the artifact the caller wants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// The stored bytes, verified against download checksums only.
    Raw,
    /// The canonical bytes: stored bytes with processing steps reversed.
    Canonical,
}

/// Which bytes a checksum covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    /// The stored bytes as transferred.
    Download,
    /// The canonical bytes.
    Artifact,
}

impl std::fmt::Display for Scope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Download => f.write_str("download"),
            Self::Artifact => f.write_str("artifact"),
        }
    }
}

/// One pipeline stage, described before it is built.
#[derive(Debug, Clone)]
pub enum StageSpec {
    /// Stored bytes must start with a zip signature.
    ZipStructure,
    /// Digest must match.
    Checksum(Checksum, Scope),
    /// Detached Ed25519 signature over the SHA-256 of the bytes.
    Signature {
        /// Base64 signature from the descriptor.
        signature: String,
        /// Base64 trusted public keys.
        trusted_keys: Vec<String>,
    },
    /// Whether unsigned artifacts are acceptable.
    TrustPolicy {
        /// Fail unsigned artifacts.
        require_signatures: bool,
        /// The descriptor carries a signature.
        signed: bool,
    },
    /// Reverse a processing step.
    Process(ProcessingStepDescriptor),
}

/// Stages for fetching `descriptor` in `direction`, outermost first.
pub fn stage_plan(
    descriptor: &ArtifactDescriptor,
    direction: Direction,
    config: &EngineConfig,
) -> Vec<StageSpec> {
    let mut plan = Vec::new();

    if descriptor
        .property(props::DOWNLOAD_CONTENT_TYPE)
        .is_some_and(|t| t.eq_ignore_ascii_case(props::CONTENT_TYPE_ZIP))
    {
        plan.push(StageSpec::ZipStructure);
    }
    plan.extend(checksum_stages(descriptor.download_checksums(), Scope::Download, config));

    if direction == Direction::Raw {
        return plan;
    }

    plan.extend(
        descriptor
            .processing_steps()
            .iter()
            .cloned()
            .map(StageSpec::Process),
    );
    plan.extend(checksum_stages(descriptor.artifact_checksums(), Scope::Artifact, config));

    let signature = descriptor.property(props::SIGNATURE_ED25519);
    if let Some(signature) = signature.filter(|_| !descriptor.is_folder()) {
        plan.push(StageSpec::Signature {
            signature: signature.to_string(),
            trusted_keys: config.trusted_keys.clone(),
        });
    }
    plan.push(StageSpec::TrustPolicy {
        require_signatures: config.require_signatures,
        signed: signature.is_some(),
    });
    plan
}

fn checksum_stages(
    checksums: Vec<Checksum>,
    scope: Scope,
    config: &EngineConfig,
) -> impl Iterator<Item = StageSpec> + '_ {
    checksums
        .into_iter()
        .filter(|c| config.checksum_enabled(c.algorithm_id()))
        .map(move |c| StageSpec::Checksum(c, scope))
}

/// A sink decorator that reports an outcome when closed.
pub trait Stage: Write + Send {
    /// Finalize this stage and every stage behind it, returning their
    /// outcomes outermost first.
    ///
    /// # Errors
    ///
    /// Propagates I/O errors from the underlying sink.
    fn close(self: Box<Self>) -> io::Result<Vec<Status>>;
}

/// Passes bytes through a [`Verifier`] on their way to the next stage.
struct VerifyStage<'a> {
    verifier: Box<dyn Verifier>,
    next: Box<dyn Stage + 'a>,
}

impl Write for VerifyStage<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.next.write(buf)?;
        self.verifier.update(&buf[..n]);
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.next.flush()
    }
}

impl Stage for VerifyStage<'_> {
    fn close(self: Box<Self>) -> io::Result<Vec<Status>> {
        let own = self.verifier.finish();
        let mut statuses = vec![own];
        statuses.extend(self.next.close()?);
        Ok(statuses)
    }
}

/// Swallows the bytes of an artifact whose required step cannot be reversed.
struct RejectStage<'a> {
    status: Status,
    next: Box<dyn Stage + 'a>,
}

impl Write for RejectStage<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Stage for RejectStage<'_> {
    fn close(self: Box<Self>) -> io::Result<Vec<Status>> {
        let mut statuses = vec![self.status];
        statuses.extend(self.next.close()?);
        Ok(statuses)
    }
}

/// Innermost stage: the caller's sink, counting what reaches it.
struct SinkStage<'a> {
    sink: &'a mut (dyn Write + Send),
    written: Arc<AtomicU64>,
}

impl Write for SinkStage<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.sink.write(buf)?;
        self.written.fetch_add(n as u64, Ordering::Relaxed);
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.sink.flush()
    }
}

impl Stage for SinkStage<'_> {
    fn close(mut self: Box<Self>) -> io::Result<Vec<Status>> {
        self.sink.flush()?;
        Ok(Vec::new())
    }
}

/// Result of closing a pipeline.
#[derive(Debug, Clone)]
pub struct PipelineOutcome {
    /// Aggregate of every stage outcome that was not plain OK.
    pub status: Status,
    /// Bytes that reached the caller's sink.
    pub bytes_written: u64,
}

/// A composed chain of stages in front of a sink.
pub struct Pipeline<'a> {
    head: Box<dyn Stage + 'a>,
    written: Arc<AtomicU64>,
}

impl std::fmt::Debug for Pipeline<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("bytes_written", &self.bytes_written())
            .finish_non_exhaustive()
    }
}

impl<'a> Pipeline<'a> {
    /// Compose `plan` (outermost first) in front of `sink`.
    pub fn build(plan: Vec<StageSpec>, sink: &'a mut (dyn Write + Send)) -> Self {
        let written = Arc::new(AtomicU64::new(0));
        let mut head: Box<dyn Stage + 'a> = Box::new(SinkStage {
            sink,
            written: Arc::clone(&written),
        });
        for spec in plan.into_iter().rev() {
            head = wrap(spec, head);
        }
        Self { head, written }
    }

    /// Bytes that have reached the sink so far.
    pub fn bytes_written(&self) -> u64 {
        self.written.load(Ordering::Relaxed)
    }

    /// Flush every stage and collect outcomes.
    ///
    /// # Errors
    ///
    /// I/O errors from the sink are returned immediately.
    pub fn close(self) -> io::Result<PipelineOutcome> {
        let written = Arc::clone(&self.written);
        let statuses = self.head.close()?;
        let mut status = Status::multi(StatusCode::Ok, "Verification");
        status.add_all(
            statuses
                .into_iter()
                .filter(|s| !s.is_ok() || s.code() != StatusCode::Ok),
        );
        let status = if status.children().is_empty() {
            Status::ok()
        } else {
            status
        };
        Ok(PipelineOutcome {
            status,
            bytes_written: written.load(Ordering::Relaxed),
        })
    }
}

impl Write for Pipeline<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.head.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.head.flush()
    }
}

fn wrap<'a>(spec: StageSpec, next: Box<dyn Stage + 'a>) -> Box<dyn Stage + 'a> {
    let verifier: Box<dyn Verifier> = match spec {
        StageSpec::ZipStructure => Box::new(ZipStructureVerifier::new()),
        StageSpec::Checksum(checksum, scope) => {
            match ChecksumVerifier::new(checksum.clone(), scope) {
                Some(v) => Box::new(v),
                None => {
                    tracing::warn!(algorithm = %checksum.algorithm_id(), "Unsupported checksum algorithm");
                    Box::new(NoticeVerifier::new(Status::warning(
                        StatusCode::Ok,
                        format!(
                            "Unsupported {scope} checksum algorithm '{}' not verified",
                            checksum.algorithm_id()
                        ),
                    )))
                }
            }
        }
        StageSpec::Signature {
            signature,
            trusted_keys,
        } => Box::new(SignatureVerifier::new(&signature, &trusted_keys)),
        StageSpec::TrustPolicy {
            require_signatures,
            signed,
        } => Box::new(TrustPolicyVerifier::new(require_signatures, signed)),
        StageSpec::Process(step) => return process_stage(step, next),
    };
    Box::new(VerifyStage { verifier, next })
}

fn process_stage<'a>(
    step: ProcessingStepDescriptor,
    next: Box<dyn Stage + 'a>,
) -> Box<dyn Stage + 'a> {
    if step.processor_id == GZIP_PROCESSOR {
        return gzip::GzipStage::boxed(next);
    }
    if step.required {
        tracing::warn!(processor = %step.processor_id, "No processor for required step");
        Box::new(RejectStage {
            status: Status::error(
                StatusCode::ArtifactProcessing,
                format!("Unknown required processing step '{}'", step.processor_id),
            ),
            next,
        })
    } else {
        Box::new(VerifyStage {
            verifier: Box::new(NoticeVerifier::new(Status::warning(
                StatusCode::Ok,
                format!("Skipped unknown optional processing step '{}'", step.processor_id),
            ))),
            next,
        })
    }
}
