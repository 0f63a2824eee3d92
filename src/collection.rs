use crate::error::QvmError;
use crate::protocol;
use crate::transport::Transport;

/// A cached list of names served by one dom0 list method
/// (labels, storage pools).
#[derive(Debug)]
pub struct NameCollection {
    kind: &'static str,
    list_method: &'static str,
    names: Option<Vec<String>>,
}

impl NameCollection {
    pub fn new(kind: &'static str, list_method: &'static str) -> Self {
        Self {
            kind,
            list_method,
            names: None,
        }
    }

    pub fn clear_cache(&mut self) {
        self.names = None;
    }

    pub async fn refresh<T: Transport>(&mut self, t: &T, force: bool) -> Result<(), QvmError> {
        if !force && self.names.is_some() {
            return Ok(());
        }
        let reply = t.call("dom0", self.list_method, None, None).await?;
        self.names = Some(protocol::payload_lines(&reply)?);
        Ok(())
    }

    pub async fn names<T: Transport>(&mut self, t: &T) -> Result<Vec<String>, QvmError> {
        self.refresh(t, false).await?;
        Ok(self.names.clone().unwrap_or_default())
    }

    pub async fn contains<T: Transport>(&mut self, t: &T, name: &str) -> Result<bool, QvmError> {
        Ok(self.names(t).await?.iter().any(|n| n == name))
    }

    /// Fail with `NotFound` unless `name` is in the collection.
    pub async fn require<T: Transport>(&mut self, t: &T, name: &str) -> Result<(), QvmError> {
        if self.contains(t, name).await? {
            Ok(())
        } else {
            Err(QvmError::NotFound {
                kind: self.kind,
                name: name.to_string(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{self, FakeQubesd};
    use crate::transport::SocketTransport;

    #[tokio::test]
    async fn labels_are_listed_once() {
        let qubesd = FakeQubesd::start(|_| testing::ok(b"red\norange\nblack\n"));
        let t = SocketTransport::new(qubesd.path());
        let mut labels = NameCollection::new("label", "mgmt.label.List");

        assert!(labels.contains(&t, "red").await.unwrap());
        labels.require(&t, "black").await.unwrap();
        let err = labels.require(&t, "purple").await.unwrap_err();
        assert_eq!(err.to_string(), "label 'purple' does not exist");
        assert_eq!(qubesd.methods(), vec!["mgmt.label.List"]);
    }
}
