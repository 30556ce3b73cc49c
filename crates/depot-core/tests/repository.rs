//! End-to-end tests against real on-disk repositories.

use std::collections::BTreeMap;
use std::io::Write;

use depot_core::mapper::LocationMapper;
use depot_core::{
    ArtifactRepository, ArtifactRequest, Destination, EngineConfig, RequestState,
};
use depot_schema::{
    ArtifactDescriptor, ArtifactKey, ChecksumAlgorithm, MappingRule, ProcessingStepDescriptor,
    StatusCode, Version, artifact_error, props,
};
use flate2::Compression;
use flate2::write::GzEncoder;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;
use url::Url;

/// A fresh local repository in a temporary directory.
struct TestRepo {
    dir: TempDir,
    repo: ArtifactRepository,
}

impl TestRepo {
    fn new(config: EngineConfig) -> Self {
        let dir = TempDir::new().expect("failed to create temp dir");
        let repo = ArtifactRepository::create(&Self::url_of(&dir), "test", config)
            .expect("failed to create repository");
        Self { dir, repo }
    }

    fn url_of(dir: &TempDir) -> Url {
        Url::from_directory_path(dir.path()).expect("absolute path")
    }

    fn url(&self) -> Url {
        Self::url_of(&self.dir)
    }

    /// Write `bytes` as the stored form of `descriptor` and register it.
    fn publish(&self, descriptor: &ArtifactDescriptor, bytes: &[u8]) -> ArtifactDescriptor {
        let mut sink = self.repo.output_stream(descriptor).expect("output stream");
        sink.write_all(bytes).unwrap();
        let registered = sink.descriptor().clone();
        assert!(sink.close().unwrap());
        registered
    }
}

fn bundle(id: &str) -> ArtifactDescriptor {
    ArtifactDescriptor::new(ArtifactKey::new("osgi.bundle", id, Version::new("1.0.0")))
}

fn gzip(data: &[u8]) -> Vec<u8> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data).unwrap();
    encoder.finish().unwrap()
}

#[test]
fn bundle_rule_maps_to_plugins_folder() {
    let mapper = LocationMapper::new(&[MappingRule::new(
        "(& (classifier=osgi.bundle))",
        "${repoUrl}/plugins/${id}_${version}.jar",
    )]);
    let url = mapper
        .resolve("https://x/repo", "osgi.bundle", "foo", "1.0.0", None, &BTreeMap::new())
        .unwrap();
    assert_eq!(url.as_str(), "https://x/repo/plugins/foo_1.0.0.jar");
}

#[tokio::test]
async fn descriptors_rules_and_properties_round_trip() {
    for compressed in [false, true] {
        let t = TestRepo::new(EngineConfig::default());
        if compressed {
            t.repo.set_property(props::COMPRESSED, Some("true")).unwrap();
        }
        t.repo
            .set_rules(vec![
                MappingRule::new("(classifier=binary)", "${repoUrl}/bin/${id}-${version}"),
                MappingRule::new("(classifier=osgi.bundle)", "${repoUrl}/plugins/${id}_${version}.jar"),
            ])
            .unwrap();
        t.publish(&bundle("a").with_property("custom", "x & <y>"), b"a");
        t.publish(
            &bundle("a").with_processing_steps(vec![ProcessingStepDescriptor::new(
                "gzip", None, true,
            )]),
            &gzip(b"a"),
        );

        let reopened = ArtifactRepository::open(&t.url(), EngineConfig::default())
            .await
            .unwrap();
        assert_eq!(reopened.rules(), t.repo.rules());
        assert_eq!(reopened.properties(), t.repo.properties());
        let mut before = t.repo.descriptors().to_vec();
        let mut after = reopened.descriptors().to_vec();
        before.sort_by_key(ToString::to_string);
        after.sort_by_key(ToString::to_string);
        assert_eq!(before, after, "compressed = {compressed}");
        for (a, b) in before.iter().zip(&after) {
            assert_eq!(a.properties(), b.properties());
            assert_eq!(a.repository_properties(), b.repository_properties());
        }
    }
}

#[tokio::test]
async fn canonical_and_raw_fetch_of_a_gzipped_artifact() {
    let t = TestRepo::new(EngineConfig::default());
    let canonical = b"the canonical artifact bytes";
    let stored = gzip(canonical);

    let mut descriptor = bundle("zipped")
        .with_processing_steps(vec![ProcessingStepDescriptor::new("gzip", None, true)]);
    descriptor.set_download_checksum(
        ChecksumAlgorithm::Sha256,
        ChecksumAlgorithm::Sha256.compute(&stored).as_str(),
    );
    descriptor.set_artifact_checksum(
        ChecksumAlgorithm::Blake3,
        ChecksumAlgorithm::Blake3.compute(canonical).as_str(),
    );
    let registered = t.publish(&descriptor, &stored);
    assert!(registered.blob_id().is_some());

    let cancel = CancellationToken::new();
    let mut out = Vec::new();
    let status = t.repo.get_artifact(&descriptor, &mut out, &cancel).await;
    assert!(status.is_ok(), "{status}");
    assert_eq!(out, canonical);

    let mut raw = Vec::new();
    let status = t.repo.get_raw_artifact(&descriptor, &mut raw, &cancel).await;
    assert!(status.is_ok(), "{status}");
    assert_eq!(raw, stored);
}

#[tokio::test]
async fn corrupt_content_is_an_artifact_error() {
    let t = TestRepo::new(EngineConfig::default());
    let mut descriptor = bundle("corrupt");
    descriptor.set_download_checksum(ChecksumAlgorithm::Sha256, &"0".repeat(64));
    t.publish(&descriptor, b"not what the checksum says");

    let status = t
        .repo
        .get_artifact(&descriptor, &mut Vec::new(), &CancellationToken::new())
        .await;
    assert!(status.is_error());
    assert!(artifact_error(&status));
}

#[tokio::test]
async fn failing_mirrors_are_each_tried_once() {
    let mut server = mockito::Server::new_async().await;
    let base = server.url();
    let list = format!(
        r#"<mirrors><mirror url="{base}/m1/"/><mirror url="{base}/m2/"/><mirror url="{base}/m3/"/></mirrors>"#
    );
    let _list = server
        .mock("GET", "/mirrors")
        .match_query(mockito::Matcher::Any)
        .with_body(list)
        .create_async()
        .await;
    let m1 = server
        .mock("GET", "/m1/plugins/foo_1.0.0.jar")
        .with_status(500)
        .expect(1)
        .create_async()
        .await;
    let m2 = server
        .mock("GET", "/m2/plugins/foo_1.0.0.jar")
        .with_status(503)
        .expect(1)
        .create_async()
        .await;
    let m3 = server
        .mock("GET", "/m3/plugins/foo_1.0.0.jar")
        .with_body("mirrored jar")
        .expect(1)
        .create_async()
        .await;

    let config = EngineConfig {
        force_threading: true,
        ..EngineConfig::default()
    };
    let t = TestRepo::new(config);
    t.repo
        .set_property(props::MIRRORS_URL, Some(format!("{base}/mirrors").as_str()))
        .unwrap();
    t.repo.add_descriptor(bundle("foo")).unwrap();

    let mut out = Vec::new();
    let status = t
        .repo
        .get_artifact(&bundle("foo"), &mut out, &CancellationToken::new())
        .await;
    assert!(status.is_ok(), "{status}");
    assert_eq!(out, b"mirrored jar");

    m1.assert_async().await;
    m2.assert_async().await;
    m3.assert_async().await;
}

#[tokio::test]
async fn bad_content_is_not_retried_on_other_mirrors() {
    let mut server = mockito::Server::new_async().await;
    let base = server.url();
    let list =
        format!(r#"<mirrors><mirror url="{base}/m1/"/><mirror url="{base}/m2/"/></mirrors>"#);
    let _list = server
        .mock("GET", "/mirrors")
        .match_query(mockito::Matcher::Any)
        .with_body(list)
        .create_async()
        .await;
    let m1 = server
        .mock("GET", "/m1/plugins/foo_1.0.0.jar")
        .with_body("tampered")
        .expect(1)
        .create_async()
        .await;
    let m2 = server
        .mock("GET", "/m2/plugins/foo_1.0.0.jar")
        .with_body("genuine")
        .expect(0)
        .create_async()
        .await;

    let config = EngineConfig {
        force_threading: true,
        ..EngineConfig::default()
    };
    let t = TestRepo::new(config);
    t.repo
        .set_property(props::MIRRORS_URL, Some(format!("{base}/mirrors").as_str()))
        .unwrap();
    let mut descriptor = bundle("foo");
    descriptor.set_download_checksum(
        ChecksumAlgorithm::Sha256,
        ChecksumAlgorithm::Sha256.compute(b"genuine").as_str(),
    );
    t.repo.add_descriptor(descriptor.clone()).unwrap();

    let mut out = Vec::new();
    let status = t
        .repo
        .get_artifact(&descriptor, &mut out, &CancellationToken::new())
        .await;
    assert!(artifact_error(&status), "{status}");
    assert!(out.is_empty());

    m1.assert_async().await;
    m2.assert_async().await;
}

#[tokio::test]
async fn local_batch_runs_inline_and_fills_destinations() {
    let source = TestRepo::new(EngineConfig::default());
    for id in ["a", "b", "c"] {
        source.publish(&bundle(id), id.as_bytes());
    }
    let target = TestRepo::new(EngineConfig::default());
    let out = TempDir::new().unwrap();

    let mut requests: Vec<_> = ["a", "b"]
        .into_iter()
        .map(|id| {
            ArtifactRequest::new(
                bundle(id),
                Destination::File(out.path().join(format!("{id}.jar"))),
            )
        })
        .collect();
    requests.push(ArtifactRequest::new(
        bundle("c"),
        Destination::Repository(target.repo.clone()),
    ));
    requests.push(ArtifactRequest::new(
        bundle("missing"),
        Destination::File(out.path().join("missing.jar")),
    ));

    let outcome = source
        .repo
        .get_artifacts(requests, &CancellationToken::new())
        .await;

    assert!(outcome.synchronous);
    assert_eq!(outcome.workers, 0);
    assert!(outcome.status.is_error());
    assert_eq!(std::fs::read(out.path().join("a.jar")).unwrap(), b"a");
    assert_eq!(std::fs::read(out.path().join("b.jar")).unwrap(), b"b");
    assert!(!out.path().join("missing.jar").exists());
    assert!(target.repo.contains(&bundle("c")));

    let states: Vec<_> = outcome.requests.iter().map(|r| r.state).collect();
    assert_eq!(
        states,
        [
            RequestState::Done,
            RequestState::Done,
            RequestState::Done,
            RequestState::Failed
        ]
    );
    assert_eq!(
        outcome.requests[3].status.code(),
        StatusCode::ArtifactNotFound
    );
}

#[tokio::test]
async fn remote_repository_is_read_only() {
    let source = TestRepo::new(EngineConfig::default());
    source.publish(&bundle("remote"), b"remote bytes");
    let xml = std::fs::read_to_string(source.dir.path().join(depot_schema::METADATA_XML)).unwrap();

    let mut server = mockito::Server::new_async().await;
    let _jar = server
        .mock("GET", "/repo/artifacts.jar")
        .with_status(404)
        .create_async()
        .await;
    let _xml = server
        .mock("GET", "/repo/artifacts.xml")
        .with_body(xml)
        .create_async()
        .await;
    let _artifact = server
        .mock("GET", "/repo/plugins/remote_1.0.0.jar")
        .with_body("remote bytes")
        .create_async()
        .await;

    let url = Url::parse(&format!("{}/repo", server.url())).unwrap();
    let remote = ArtifactRepository::open(&url, EngineConfig::default())
        .await
        .unwrap();
    assert!(!remote.is_local());
    assert!(remote.contains(&bundle("remote")));
    assert!(matches!(
        remote.add_descriptor(bundle("other")),
        Err(depot_core::RepositoryError::ReadOnly(_))
    ));

    let mut out = Vec::new();
    let status = remote
        .get_artifact(&bundle("remote"), &mut out, &CancellationToken::new())
        .await;
    assert!(status.is_ok(), "{status}");
    assert_eq!(out, b"remote bytes");
}

#[tokio::test]
async fn locations_outside_the_repository_are_fetched_once() {
    let mut server = mockito::Server::new_async().await;
    let base = server.url();
    let list =
        format!(r#"<mirrors><mirror url="{base}/m1/"/><mirror url="{base}/m2/"/></mirrors>"#);
    let _list = server
        .mock("GET", "/mirrors")
        .match_query(mockito::Matcher::Any)
        .with_body(list)
        .create_async()
        .await;
    let external = server
        .mock("GET", "/external/foo.jar")
        .with_status(500)
        .expect(1)
        .create_async()
        .await;
    let mirrored = server
        .mock("GET", mockito::Matcher::Regex(r"^/m[12]/".into()))
        .expect(0)
        .create_async()
        .await;

    let config = EngineConfig {
        force_threading: true,
        ..EngineConfig::default()
    };
    let t = TestRepo::new(config);
    t.repo
        .set_property(props::MIRRORS_URL, Some(format!("{base}/mirrors").as_str()))
        .unwrap();
    let referenced = bundle("foo").with_repository_property(
        props::ARTIFACT_REFERENCE,
        format!("{base}/external/foo.jar").as_str(),
    );
    t.repo.add_descriptor(referenced.clone()).unwrap();

    let mut out = Vec::new();
    let status = t
        .repo
        .get_artifact(&referenced, &mut out, &CancellationToken::new())
        .await;
    assert!(status.is_error(), "{status}");
    assert!(!status.is_retry(), "{status}");
    assert!(out.is_empty());

    external.assert_async().await;
    mirrored.assert_async().await;
}
