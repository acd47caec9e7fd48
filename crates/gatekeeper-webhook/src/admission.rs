//! Admission decisions for Pods.
//!
//! Every image of a Pod in a limited namespace is sized through the current
//! snapshot's resolver and compared against the namespace limit. Lookup
//! failures deny: the gatekeeper fails closed.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::Instant;

use gatekeeper_core::{format_mb, AdmissionVerdict, ImageRef, NamespacePolicy};
use gatekeeper_registry::ResolveErrorKind;
use k8s_openapi::api::core::v1::Pod;
use kube::core::admission::{AdmissionRequest, AdmissionResponse, AdmissionReview, Operation};
use kube::core::DynamicObject;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::credentials::CredentialResolver;
use crate::metrics::{self, OUTCOME_OK};
use crate::state::{Snapshot, SnapshotHandle};

/// Annotation naming the registry all images of the Pod are pulled from.
pub const ORIGINAL_REGISTRY_ANNOTATION: &str = "imagesizegatekeeper.k8s.io/original-registry";

/// Annotation naming a Secret in the Pod's namespace holding registry auth.
pub const CREDENTIALS_SECRET_ANNOTATION: &str = "imagesizegatekeeper.k8s.io/credentials-secret";

/// Namespace assumed when a request carries none.
const DEFAULT_NAMESPACE: &str = "default";

/// An admission request as received on the wire.
///
/// An `object` that does not decode as a Kubernetes object is set aside
/// rather than failing the whole review, so the request still gets a
/// verdict.
#[derive(Debug, Clone)]
pub struct DecodedRequest {
    /// The typed request. `object` is `None` when it was set aside.
    pub request: AdmissionRequest<DynamicObject>,
    /// Why `object` could not be decoded.
    pub object_error: Option<String>,
}

impl DecodedRequest {
    /// Wraps a request whose object decoded.
    pub fn new(request: AdmissionRequest<DynamicObject>) -> Self {
        Self {
            request,
            object_error: None,
        }
    }

    /// Decodes an AdmissionReview body.
    ///
    /// Fails when the body is not a review or carries no request.
    pub fn from_slice(body: &[u8]) -> Result<Self, String> {
        let mut review: Value = serde_json::from_slice(body).map_err(|e| e.to_string())?;

        let mut object_error = None;
        if let Some(request) = review.get_mut("request").and_then(Value::as_object_mut) {
            for field in ["object", "oldObject"] {
                let Some(value) = request.get_mut(field).filter(|value| !value.is_null()) else {
                    continue;
                };
                if let Err(e) = DynamicObject::deserialize(&*value) {
                    debug!(field, error = %e, "Setting aside undecodable admission object");
                    if field == "object" {
                        object_error = Some(e.to_string());
                    }
                    *value = Value::Null;
                }
            }
        }

        let review: AdmissionReview<DynamicObject> =
            serde_json::from_value(review).map_err(|e| e.to_string())?;
        let request =
            TryInto::<AdmissionRequest<DynamicObject>>::try_into(review).map_err(|e| e.to_string())?;
        Ok(Self {
            request,
            object_error,
        })
    }
}

/// Times one registry lookup.
///
/// A timer dropped before [`LookupTimer::finish`] belongs to a lookup cut off
/// by the admission deadline and counts as a transport failure.
struct LookupTimer {
    started: Instant,
    finished: bool,
}

impl LookupTimer {
    fn start() -> Self {
        Self {
            started: Instant::now(),
            finished: false,
        }
    }

    fn finish(mut self, outcome: &str) {
        self.finished = true;
        metrics::record_lookup(outcome, self.started.elapsed());
    }
}

impl Drop for LookupTimer {
    fn drop(&mut self) {
        if !self.finished {
            metrics::record_lookup(ResolveErrorKind::Transport.as_label(), self.started.elapsed());
        }
    }
}

/// Evaluates admission requests against the current snapshot.
#[derive(Clone)]
pub struct AdmissionHandler {
    state: Arc<SnapshotHandle>,
    credentials: CredentialResolver,
}

impl AdmissionHandler {
    /// Creates a handler reading `state` and resolving credentials with `credentials`.
    pub fn new(state: Arc<SnapshotHandle>, credentials: CredentialResolver) -> Self {
        Self { state, credentials }
    }

    /// Returns the snapshot handle.
    pub fn state(&self) -> &Arc<SnapshotHandle> {
        &self.state
    }

    /// Decides one admission request.
    pub async fn review(&self, decoded: &DecodedRequest) -> AdmissionVerdict {
        let request = &decoded.request;
        let verdict = self.decide(decoded).await;
        metrics::record_admission(verdict.label());

        if verdict.allowed {
            info!(
                uid = %request.uid,
                namespace = ?request.namespace,
                name = %request.name,
                message = %verdict.message,
                "Admission request allowed"
            );
        } else {
            warn!(
                uid = %request.uid,
                namespace = ?request.namespace,
                name = %request.name,
                message = %verdict.message,
                "Admission request denied"
            );
        }
        verdict
    }

    async fn decide(&self, decoded: &DecodedRequest) -> AdmissionVerdict {
        let request = &decoded.request;
        let uid = request.uid.as_str();

        if request.resource.resource != "pods" || request.kind.kind != "Pod" {
            return AdmissionVerdict::skip(uid, "not a Pod");
        }
        if let Some(operation) = no_image_operation(&request.operation) {
            return AdmissionVerdict::skip(uid, format!("{operation} carries no new images"));
        }

        let namespace = request.namespace.as_deref().unwrap_or(DEFAULT_NAMESPACE);
        let snapshot = self.state.current();
        let Some(policy) = snapshot.config.policies.limit_for(namespace) else {
            return AdmissionVerdict::allow(uid, format!("no size limit for namespace {namespace}"));
        };

        let pod = match (&decoded.object_error, request.object.as_ref()) {
            (Some(e), _) => return AdmissionVerdict::deny(uid, format!("cannot parse Pod: {e}")),
            (None, Some(object)) => match pod_from_object(object) {
                Ok(pod) => pod,
                Err(e) => return AdmissionVerdict::deny(uid, format!("cannot parse Pod: {e}")),
            },
            (None, None) => {
                return AdmissionVerdict::deny(uid, "cannot parse Pod: request has no object")
            }
        };

        let deadline = snapshot.config.admission_timeout;
        match tokio::time::timeout(deadline, self.evaluate(&snapshot, policy, namespace, &pod, uid))
            .await
        {
            Ok(verdict) => verdict,
            Err(_) => AdmissionVerdict::deny(
                uid,
                format!(
                    "cannot resolve image sizes for namespace {namespace}: Transport: admission deadline of {}s exceeded",
                    deadline.as_secs_f64()
                ),
            ),
        }
    }

    async fn evaluate(
        &self,
        snapshot: &Snapshot,
        policy: &NamespacePolicy,
        namespace: &str,
        pod: &Pod,
        uid: &str,
    ) -> AdmissionVerdict {
        let annotations = PodAnnotations::read(pod);

        if policy.require_original_registry && annotations.original_registry.is_none() {
            return AdmissionVerdict::deny(
                uid,
                format!("missing annotation {ORIGINAL_REGISTRY_ANNOTATION}"),
            );
        }

        let credentials = self
            .credentials
            .scope(&snapshot.config, namespace, annotations.credentials_secret)
            .await;

        let mut largest: Option<(String, u64)> = None;
        for image in pod_images(pod) {
            let mut reference = match ImageRef::parse(&image) {
                Ok(reference) => reference,
                Err(e) => {
                    return AdmissionVerdict::deny(uid, format!("invalid image reference {image}: {e}"))
                }
            };
            if let Some(host) = annotations.original_registry {
                reference = reference.with_registry(host);
            }

            let credential = credentials.for_registry(&reference.registry);

            let timer = LookupTimer::start();
            let result = snapshot.resolver.size_of(&reference, credential.as_ref()).await;
            timer.finish(
                result
                    .as_ref()
                    .map_or_else(|e| e.kind().as_label(), |_| OUTCOME_OK),
            );

            let size = match result {
                Ok(size) => size,
                Err(e) => {
                    warn!(
                        uid,
                        image = %image,
                        registry = %reference.registry,
                        endpoint = %snapshot.resolver.endpoint(&reference.registry),
                        error = %e,
                        "Image size lookup failed"
                    );
                    return AdmissionVerdict::deny(
                        uid,
                        format!("cannot resolve size of image {image}: {}: {e}", e.kind()),
                    );
                }
            };

            let effective = size.effective_bytes();
            debug!(
                uid,
                image = %image,
                registry = %reference.registry,
                size_bytes = size.size_bytes,
                accurate = size.accurate,
                effective_bytes = effective,
                "Resolved image size"
            );

            if effective > policy.max_size_bytes {
                return AdmissionVerdict::deny(
                    uid,
                    format!(
                        "image {image} size ({}) exceeds limit ({}) for namespace {namespace}",
                        format_mb(effective),
                        format_mb(policy.max_size_bytes)
                    ),
                );
            }

            if largest.as_ref().map_or(true, |(_, bytes)| effective > *bytes) {
                largest = Some((image, effective));
            }
        }

        match largest {
            Some((image, bytes)) => AdmissionVerdict::allow(
                uid,
                format!(
                    "all images within limit for namespace {namespace}: {image} {} <= {}",
                    format_mb(bytes),
                    format_mb(policy.max_size_bytes)
                ),
            ),
            None => AdmissionVerdict::allow(uid, format!("no images to evaluate for namespace {namespace}")),
        }
    }
}

/// Builds the response review for a request.
///
/// The response echoes the request's type metadata and UID.
pub fn into_review(
    request: &AdmissionRequest<DynamicObject>,
    verdict: &AdmissionVerdict,
) -> AdmissionReview<DynamicObject> {
    let response = AdmissionResponse::from(request);
    let response = if verdict.allowed {
        let mut response = response;
        response.result.message.clone_from(&verdict.message);
        response
    } else {
        response.deny(&verdict.message)
    };
    response.into_review()
}

/// Returns the display name of operations that never add images.
const fn no_image_operation(operation: &Operation) -> Option<&'static str> {
    match operation {
        Operation::Delete => Some("DELETE"),
        Operation::Connect => Some("CONNECT"),
        Operation::Create | Operation::Update => None,
    }
}

fn pod_from_object(object: &DynamicObject) -> Result<Pod, serde_json::Error> {
    serde_json::to_value(object).and_then(serde_json::from_value)
}

/// Gatekeeper annotations of a Pod.
#[derive(Debug, Default, PartialEq, Eq)]
struct PodAnnotations<'a> {
    original_registry: Option<&'a str>,
    credentials_secret: Option<&'a str>,
}

impl<'a> PodAnnotations<'a> {
    fn read(pod: &'a Pod) -> Self {
        let Some(annotations) = pod.metadata.annotations.as_ref() else {
            return Self::default();
        };
        Self {
            original_registry: annotation(annotations, ORIGINAL_REGISTRY_ANNOTATION),
            credentials_secret: annotation(annotations, CREDENTIALS_SECRET_ANNOTATION),
        }
    }
}

fn annotation<'a>(annotations: &'a BTreeMap<String, String>, key: &str) -> Option<&'a str> {
    annotations
        .get(key)
        .map(|value| value.trim())
        .filter(|value| !value.is_empty())
}

/// Lists the images of a Pod, init containers first, each image once.
pub fn pod_images(pod: &Pod) -> Vec<String> {
    let Some(spec) = pod.spec.as_ref() else {
        return Vec::new();
    };

    let mut seen = HashSet::new();
    spec.init_containers
        .iter()
        .flatten()
        .chain(&spec.containers)
        .filter_map(|container| container.image.as_deref())
        .filter(|image| seen.insert(*image))
        .map(ToString::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;
    use gatekeeper_core::{
        ConfigSnapshot, Credential, GatekeeperConfig, ImageSize, NamespaceRestriction,
    };
    use gatekeeper_registry::{RegistryError, SizeResolver};

    use crate::credentials::SecretStore;
    use serde_json::json;

    const MB: u64 = 1024 * 1024;

    #[derive(Default)]
    struct FakeResolver {
        sizes: HashMap<String, ImageSize>,
        calls: AtomicUsize,
        seen: parking_lot::Mutex<Vec<String>>,
        delay: Option<Duration>,
    }

    impl FakeResolver {
        fn with(mut self, image: &str, size: ImageSize) -> Self {
            self.sizes.insert(image.to_string(), size);
            self
        }
    }

    #[async_trait]
    impl SizeResolver for FakeResolver {
        async fn size_of(
            &self,
            image: &ImageRef,
            _credential: Option<&Credential>,
        ) -> Result<ImageSize, RegistryError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.seen.lock().push(image.to_string());
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            self.sizes
                .get(&image.to_string())
                .copied()
                .ok_or_else(|| RegistryError::NotFound {
                    image: image.to_string(),
                })
        }

        fn name(&self) -> &'static str {
            "fake"
        }
    }

    #[derive(Default)]
    struct CountingSecrets {
        fetches: AtomicUsize,
    }

    #[async_trait]
    impl SecretStore for CountingSecrets {
        async fn secret_data(
            &self,
            _namespace: &str,
            _name: &str,
        ) -> crate::error::Result<Option<BTreeMap<String, Vec<u8>>>> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            Ok(Some(
                [(
                    "docker.io".to_string(),
                    br#"{"username":"bot","password":"tok"}"#.to_vec(),
                )]
                .into_iter()
                .collect(),
            ))
        }
    }

    fn transport_lookups() -> u64 {
        let text = metrics::render().unwrap();
        text.lines()
            .find_map(|line| line.strip_prefix(r#"imagesize_registry_lookups_total{outcome="transport"} "#))
            .map_or(0, |value| value.trim().parse().unwrap())
    }

    fn restriction(mb: f64, require_original_registry: bool) -> NamespaceRestriction {
        NamespaceRestriction {
            require_original_registry,
            ..NamespaceRestriction::new(mb)
        }
    }

    fn handler(
        restrictions: Vec<(&str, NamespaceRestriction)>,
        resolver: Arc<FakeResolver>,
    ) -> AdmissionHandler {
        let config = GatekeeperConfig {
            namespace_restrictions: restrictions
                .into_iter()
                .map(|(pattern, r)| (pattern.to_string(), r))
                .collect(),
            ..GatekeeperConfig::default()
        };
        let snapshot = Snapshot::with_resolver(ConfigSnapshot::compile(&config), resolver);
        AdmissionHandler::new(
            Arc::new(SnapshotHandle::new(snapshot)),
            CredentialResolver::static_only(),
        )
    }

    fn request(namespace: &str, operation: &str, pod: serde_json::Value) -> DecodedRequest {
        let review = json!({
            "apiVersion": "admission.k8s.io/v1",
            "kind": "AdmissionReview",
            "request": {
                "uid": "uid-1",
                "kind": {"group": "", "version": "v1", "kind": "Pod"},
                "resource": {"group": "", "version": "v1", "resource": "pods"},
                "name": "web",
                "namespace": namespace,
                "operation": operation,
                "userInfo": {},
                "object": pod,
                "dryRun": false
            }
        });
        DecodedRequest::from_slice(&serde_json::to_vec(&review).unwrap()).unwrap()
    }

    fn pod(init: &[&str], containers: &[&str], annotations: serde_json::Value) -> serde_json::Value {
        let list = |images: &[&str]| {
            images
                .iter()
                .enumerate()
                .map(|(i, image)| json!({"name": format!("c{i}"), "image": image}))
                .collect::<Vec<_>>()
        };
        json!({
            "apiVersion": "v1",
            "kind": "Pod",
            "metadata": {"name": "web", "annotations": annotations},
            "spec": {"initContainers": list(init), "containers": list(containers)}
        })
    }

    #[tokio::test]
    async fn test_within_limit_names_largest_image() {
        let resolver = Arc::new(
            FakeResolver::default()
                .with("docker.io/library/nginx:1.21", ImageSize::accurate(97 * MB))
                .with("docker.io/library/busybox:latest", ImageSize::accurate(2 * MB)),
        );
        let handler = handler(vec![("prod", restriction(500.0, false))], resolver.clone());

        let verdict = handler
            .review(&request("prod", "CREATE", pod(&["busybox"], &["nginx:1.21"], json!({}))))
            .await;

        assert!(verdict.allowed);
        assert_eq!(
            verdict.message,
            "all images within limit for namespace prod: nginx:1.21 97.00 MB <= 500.00 MB"
        );
        assert_eq!(resolver.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_init_container_over_limit_is_denied_first() {
        let resolver = Arc::new(
            FakeResolver::default()
                .with("docker.io/library/fat:1", ImageSize::accurate(900 * MB))
                .with("docker.io/library/nginx:1.21", ImageSize::accurate(97 * MB)),
        );
        let handler = handler(vec![("prod", restriction(500.0, false))], resolver.clone());

        let verdict = handler
            .review(&request("prod", "CREATE", pod(&["fat:1"], &["nginx:1.21"], json!({}))))
            .await;

        assert!(!verdict.allowed);
        assert!(verdict.message.starts_with("image fat:1 size (900.00 MB) exceeds limit (500.00 MB)"));
        assert_eq!(resolver.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_size_equal_to_limit_is_allowed() {
        let resolver = Arc::new(
            FakeResolver::default().with("docker.io/library/nginx:1.21", ImageSize::accurate(50 * MB)),
        );
        let handler = handler(vec![("prod", restriction(50.0, false))], resolver);

        let verdict = handler
            .review(&request("prod", "CREATE", pod(&[], &["nginx:1.21"], json!({}))))
            .await;
        assert!(verdict.allowed);
    }

    #[tokio::test]
    async fn test_estimated_size_applies_factor() {
        let resolver = Arc::new(
            FakeResolver::default().with("docker.io/library/nginx:1.21", ImageSize::estimated(40 * MB)),
        );
        let handler = handler(vec![("prod", restriction(50.0, false))], resolver);

        let verdict = handler
            .review(&request("prod", "CREATE", pod(&[], &["nginx:1.21"], json!({}))))
            .await;
        assert!(!verdict.allowed);
        assert!(verdict.message.contains("(68.00 MB)"));
    }

    #[tokio::test]
    async fn test_unlimited_namespace_skips_lookups() {
        let resolver = Arc::new(FakeResolver::default());
        let handler = handler(vec![("prod", restriction(1.0, false))], resolver.clone());

        let verdict = handler
            .review(&request("dev", "CREATE", pod(&[], &["nginx"], json!({}))))
            .await;
        assert!(verdict.allowed);
        assert_eq!(verdict.message, "no size limit for namespace dev");
        assert_eq!(resolver.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_delete_is_not_evaluated() {
        let resolver = Arc::new(FakeResolver::default());
        let handler = handler(vec![("prod", restriction(1.0, false))], resolver.clone());

        let verdict = handler
            .review(&request("prod", "DELETE", pod(&[], &["nginx"], json!({}))))
            .await;
        assert!(verdict.allowed);
        assert!(verdict.skipped);
        assert_eq!(resolver.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_missing_original_registry_annotation() {
        let resolver = Arc::new(FakeResolver::default());
        let handler = handler(vec![("sandbox", restriction(100.0, true))], resolver.clone());

        let verdict = handler
            .review(&request("sandbox", "CREATE", pod(&[], &["nginx"], json!({}))))
            .await;
        assert!(!verdict.allowed);
        assert_eq!(
            verdict.message,
            "missing annotation imagesizegatekeeper.k8s.io/original-registry"
        );
        assert_eq!(resolver.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_original_registry_substitutes_host() {
        let resolver = Arc::new(
            FakeResolver::default().with("ghcr.io/team/app:1", ImageSize::accurate(MB)),
        );
        let handler = handler(vec![("sandbox", restriction(100.0, true))], resolver.clone());

        let verdict = handler
            .review(&request(
                "sandbox",
                "CREATE",
                pod(
                    &[],
                    &["mirror.corp/team/app:1"],
                    json!({ ORIGINAL_REGISTRY_ANNOTATION: "ghcr.io" }),
                ),
            ))
            .await;
        assert!(verdict.allowed, "{}", verdict.message);
        assert_eq!(resolver.seen.lock().as_slice(), ["ghcr.io/team/app:1"]);
    }

    #[tokio::test]
    async fn test_lookup_failure_denies_with_kind() {
        let resolver = Arc::new(FakeResolver::default());
        let handler = handler(vec![("prod", restriction(100.0, false))], resolver);

        let verdict = handler
            .review(&request("prod", "CREATE", pod(&[], &["ghcr.io/team/gone:1"], json!({}))))
            .await;
        assert!(!verdict.allowed);
        assert!(verdict
            .message
            .starts_with("cannot resolve size of image ghcr.io/team/gone:1: NotFound:"));
    }

    #[tokio::test]
    async fn test_invalid_image_reference_denies() {
        let resolver = Arc::new(FakeResolver::default());
        let handler = handler(vec![("prod", restriction(100.0, false))], resolver);

        let verdict = handler
            .review(&request("prod", "CREATE", pod(&[], &["Bad//Image"], json!({}))))
            .await;
        assert!(!verdict.allowed);
        assert!(verdict.message.starts_with("invalid image reference Bad//Image"));
    }

    #[tokio::test]
    async fn test_unparseable_pod_denies() {
        let resolver = Arc::new(FakeResolver::default());
        let handler = handler(vec![("prod", restriction(100.0, false))], resolver);

        let object = json!({
            "apiVersion": "v1",
            "kind": "Pod",
            "metadata": {"name": "web"},
            "spec": {"containers": "not-a-list"}
        });
        let verdict = handler.review(&request("prod", "CREATE", object)).await;
        assert!(!verdict.allowed);
        assert!(verdict.message.starts_with("cannot parse Pod:"));
    }

    #[tokio::test]
    async fn test_deadline_denies_with_transport() {
        let resolver = Arc::new(FakeResolver {
            delay: Some(Duration::from_secs(30)),
            ..FakeResolver::default()
        });
        let handler = handler(vec![("prod", restriction(100.0, false))], resolver);
        {
            let current = handler.state().current();
            let mut config = current.config.clone();
            config.admission_timeout = Duration::from_millis(50);
            handler
                .state()
                .replace(Snapshot::with_resolver(config, Arc::clone(&current.resolver)));
        }

        let verdict = handler
            .review(&request("prod", "CREATE", pod(&[], &["nginx"], json!({}))))
            .await;
        assert!(!verdict.allowed);
        assert!(verdict.message.contains("Transport"));
    }

    #[tokio::test]
    async fn test_deadline_counts_cut_off_lookup_as_transport() {
        let resolver = Arc::new(FakeResolver {
            delay: Some(Duration::from_secs(30)),
            ..FakeResolver::default()
        });
        let handler = handler(vec![("prod", restriction(100.0, false))], resolver.clone());
        {
            let current = handler.state().current();
            let mut config = current.config.clone();
            config.admission_timeout = Duration::from_millis(50);
            handler
                .state()
                .replace(Snapshot::with_resolver(config, Arc::clone(&current.resolver)));
        }

        let before = transport_lookups();
        let verdict = handler
            .review(&request("prod", "CREATE", pod(&[], &["nginx"], json!({}))))
            .await;

        assert!(!verdict.allowed);
        assert_eq!(resolver.calls.load(Ordering::SeqCst), 1);
        assert!(transport_lookups() > before);
    }

    #[tokio::test]
    async fn test_secret_fetched_once_per_request() {
        let resolver = Arc::new(
            FakeResolver::default()
                .with("docker.io/library/nginx:1.21", ImageSize::accurate(MB))
                .with("docker.io/library/redis:7", ImageSize::accurate(MB))
                .with("docker.io/library/busybox:latest", ImageSize::accurate(MB)),
        );
        let secrets = Arc::new(CountingSecrets::default());
        let config = GatekeeperConfig {
            namespace_restrictions: vec![("prod".to_string(), restriction(100.0, false))],
            ..GatekeeperConfig::default()
        };
        let handler = AdmissionHandler::new(
            Arc::new(SnapshotHandle::new(Snapshot::with_resolver(
                ConfigSnapshot::compile(&config),
                resolver.clone(),
            ))),
            CredentialResolver::new(Some(secrets.clone())),
        );

        let verdict = handler
            .review(&request(
                "prod",
                "CREATE",
                pod(
                    &["busybox"],
                    &["nginx:1.21", "redis:7"],
                    json!({ CREDENTIALS_SECRET_ANNOTATION: "pull" }),
                ),
            ))
            .await;

        assert!(verdict.allowed, "{}", verdict.message);
        assert_eq!(resolver.calls.load(Ordering::SeqCst), 3);
        assert_eq!(secrets.fetches.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_undecodable_object_denies() {
        let resolver = Arc::new(FakeResolver::default());
        let handler = handler(vec![("prod", restriction(100.0, false))], resolver.clone());

        let decoded = request("prod", "CREATE", json!("garbage"));
        assert!(decoded.request.object.is_none());
        assert!(decoded.object_error.is_some());

        let verdict = handler.review(&decoded).await;
        assert!(!verdict.allowed);
        assert!(verdict.message.starts_with("cannot parse Pod:"));
        assert_eq!(resolver.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_undecodable_object_in_unlimited_namespace_is_allowed() {
        let handler = handler(vec![("prod", restriction(100.0, false))], Arc::new(FakeResolver::default()));

        let verdict = handler.review(&request("dev", "CREATE", json!(["not", "a", "pod"]))).await;
        assert!(verdict.allowed);
        assert_eq!(verdict.message, "no size limit for namespace dev");
    }

    #[test]
    fn test_decode_rejects_review_without_request() {
        let body = serde_json::to_vec(&json!({
            "apiVersion": "admission.k8s.io/v1",
            "kind": "AdmissionReview"
        }))
        .unwrap();
        assert!(DecodedRequest::from_slice(&body).is_err());
        assert!(DecodedRequest::from_slice(b"{ nope").is_err());
    }

    #[test]
    fn test_pod_images_dedup_and_order() {
        let pod: Pod = serde_json::from_value(pod(
            &["busybox", "init:1"],
            &["nginx", "busybox", "nginx"],
            json!({}),
        ))
        .unwrap();
        assert_eq!(pod_images(&pod), vec!["busybox", "init:1", "nginx"]);
    }

    #[test]
    fn test_blank_annotation_is_absent() {
        let pod: Pod = serde_json::from_value(pod(
            &[],
            &["nginx"],
            json!({ ORIGINAL_REGISTRY_ANNOTATION: "  ", CREDENTIALS_SECRET_ANNOTATION: "pull" }),
        ))
        .unwrap();
        let annotations = PodAnnotations::read(&pod);
        assert_eq!(annotations.original_registry, None);
        assert_eq!(annotations.credentials_secret, Some("pull"));
    }

    #[test]
    fn test_review_echoes_uid_and_message() {
        let req = request("prod", "CREATE", pod(&[], &["nginx"], json!({})));

        let allowed =
            serde_json::to_value(into_review(&req.request, &AdmissionVerdict::allow("uid-1", "fine"))).unwrap();
        assert_eq!(allowed["apiVersion"], "admission.k8s.io/v1");
        assert_eq!(allowed["kind"], "AdmissionReview");
        assert_eq!(allowed["response"]["uid"], "uid-1");
        assert_eq!(allowed["response"]["allowed"], true);
        assert_eq!(allowed["response"]["status"]["message"], "fine");

        let denied =
            serde_json::to_value(into_review(&req.request, &AdmissionVerdict::deny("uid-1", "too big"))).unwrap();
        assert_eq!(denied["response"]["allowed"], false);
        assert_eq!(denied["response"]["status"]["message"], "too big");
    }
}
