//! `gen-uuid TYPE [NAMESPACE NAME]`: time-based, random and name-based UUIDs.

use uuid::Uuid;

use crate::error::OpsError;
use crate::invocation::Invocation;
use crate::runner::{ExitStatus, Streams};

const USAGE: &str = "You must specify a UUID type: 1 (time-based), 4 (random), 3 (name-based UUID3), \
                     5 (name-based UUID5)";

/// Supported UUID versions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UuidRequest {
    TimeBased,
    Random,
    Md5 { namespace: Uuid, name: String },
    Sha1 { namespace: Uuid, name: String },
}

impl UuidRequest {
    /// Interpret `TYPE [NAMESPACE NAME]` terms.
    pub fn from_terms(terms: &[String]) -> crate::Result<Self> {
        let Some(kind) = terms.first() else {
            return Err(OpsError::MissingArguments {
                usage: USAGE.to_string(),
                missing: vec!["TYPE".to_string()],
            });
        };
        let kind: u8 = kind.trim().parse().map_err(|_| unsupported(kind))?;

        let name_based = |kind: u8| -> crate::Result<(Uuid, String)> {
            if terms.len() < 3 {
                return Err(OpsError::MissingArguments {
                    usage: format!(
                        "You must provide a namespace and a name for a name-based UUID (type {})",
                        kind
                    ),
                    missing: ["NAMESPACE", "NAME"][terms.len() - 1..]
                        .iter()
                        .map(|f| f.to_string())
                        .collect(),
                });
            }
            let namespace = Uuid::parse_str(&terms[1])
                .map_err(|e| OpsError::InvalidArgument("NAMESPACE".to_string(), e.to_string()))?;
            Ok((namespace, terms[2].clone()))
        };

        match kind {
            1 => Ok(UuidRequest::TimeBased),
            4 => Ok(UuidRequest::Random),
            3 => {
                let (namespace, name) = name_based(3)?;
                Ok(UuidRequest::Md5 { namespace, name })
            }
            5 => {
                let (namespace, name) = name_based(5)?;
                Ok(UuidRequest::Sha1 { namespace, name })
            }
            _ => Err(unsupported(&kind.to_string())),
        }
    }

    pub fn generate(&self) -> Uuid {
        match self {
            UuidRequest::TimeBased => Uuid::now_v1(&random_node_id()),
            UuidRequest::Random => Uuid::new_v4(),
            UuidRequest::Md5 { namespace, name } => Uuid::new_v3(namespace, name.as_bytes()),
            UuidRequest::Sha1 { namespace, name } => Uuid::new_v5(namespace, name.as_bytes()),
        }
    }
}

fn unsupported(kind: &str) -> OpsError {
    OpsError::InvalidArgument(
        "TYPE".to_string(),
        format!("Unsupported UUID type '{}'. Supported types: 1, 4, 3, 5", kind),
    )
}

/// Random node id with the multicast bit set, so it never collides with a
/// real MAC address.
fn random_node_id() -> [u8; 6] {
    let random = Uuid::new_v4();
    let mut node = [0u8; 6];
    node.copy_from_slice(&random.as_bytes()[10..]);
    node[0] |= 0x01;
    node
}

pub async fn gen_uuid(invocation: &Invocation, streams: &mut Streams<'_>) -> ExitStatus {
    match UuidRequest::from_terms(invocation.args()) {
        Ok(request) => {
            let id = request.generate();
            tracing::debug!(version = ?id.get_version(), %id, "generated uuid");
            match streams.payload(&id.hyphenated().to_string()) {
                Ok(()) => ExitStatus::SUCCESS,
                Err(e) => {
                    streams.diagnostic(&format!("cannot write uuid to stdout: {}", e));
                    ExitStatus::FAILURE
                }
            }
        }
        Err(e) => {
            streams.diagnostic(&e.to_string());
            ExitStatus::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Version;

    const DNS: &str = "6ba7b810-9dad-11d1-80b4-00c04fd430c8";

    fn terms(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_name_based_vectors() {
        let md5 = UuidRequest::from_terms(&terms(&["3", DNS, "python.org"])).unwrap();
        assert_eq!(
            md5.generate().to_string(),
            "6fa459ea-ee8a-3ca4-894e-db77e160355e"
        );
        let sha1 = UuidRequest::from_terms(&terms(&["5", DNS, "python.org"])).unwrap();
        assert_eq!(
            sha1.generate().to_string(),
            "886313e1-3b8a-5372-9b90-0c9aee199e5d"
        );
    }

    #[test]
    fn test_versions() {
        let v1 = UuidRequest::from_terms(&terms(&["1"])).unwrap().generate();
        assert_eq!(v1.get_version(), Some(Version::Mac));
        let v4 = UuidRequest::from_terms(&terms(&["4"])).unwrap().generate();
        assert_eq!(v4.get_version(), Some(Version::Random));
    }

    #[test]
    fn test_rejections() {
        let err = UuidRequest::from_terms(&[]).unwrap_err();
        assert!(err.to_string().starts_with("You must specify a UUID type"));

        let err = UuidRequest::from_terms(&terms(&["7"])).unwrap_err();
        assert!(err.to_string().contains("Unsupported UUID type '7'"));

        let err = UuidRequest::from_terms(&terms(&["uuid"])).unwrap_err();
        assert!(err.to_string().contains("Unsupported UUID type 'uuid'"));

        let err = UuidRequest::from_terms(&terms(&["5", DNS])).unwrap_err();
        assert!(err.to_string().contains("(type 5)"));
        assert!(err.to_string().contains("missing: NAME"));

        let err = UuidRequest::from_terms(&terms(&["3", "not-a-uuid", "x"])).unwrap_err();
        assert!(err.to_string().contains("NAMESPACE"));
    }

    #[tokio::test]
    async fn test_gen_uuid_prints_one_line() {
        let mut out = Vec::new();
        let mut err = Vec::new();
        let status = {
            let mut streams = Streams::new(&mut out, &mut err);
            gen_uuid(&Invocation::new(["3", DNS, "python.org"]), &mut streams).await
        };
        assert_eq!(status, ExitStatus::SUCCESS);
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "6fa459ea-ee8a-3ca4-894e-db77e160355e\n"
        );
        assert!(err.is_empty());
    }
}
