//! Reserved paths that map straight to a variant's pre-cached document.

use url::Url;

use crate::config::{Config, RouteRule};
use crate::error::Result;

#[derive(Debug, Clone, Default)]
pub struct RouteTable {
    rules: Vec<(String, Url)>,
}

impl RouteTable {
    /// Resolve every rule's document against the worker's origin.
    pub fn from_config(config: &Config) -> Result<Self> {
        Self::new(&config.origin, &config.routes)
    }

    pub fn new(origin: &Url, rules: &[RouteRule]) -> Result<Self> {
        let rules = rules
            .iter()
            .map(|rule| -> Result<(String, Url)> {
                Ok((rule.path.clone(), origin.join(&rule.document)?))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { rules })
    }

    /// Document for an exact path match on our own origin. Query strings are
    /// ignored; prefixes never match.
    pub fn resolve(&self, url: &Url, origin: &Url) -> Option<&Url> {
        if url.origin() != origin.origin() {
            return None;
        }
        self.rules
            .iter()
            .find(|(path, _)| path == url.path())
            .map(|(_, document)| document)
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> (RouteTable, Url) {
        let origin = Url::parse("https://itswatuyusei.github.io").unwrap();
        let config = Config::for_origin(origin.clone());
        (RouteTable::from_config(&config).unwrap(), origin)
    }

    #[test]
    fn test_exact_paths_resolve() {
        let (table, origin) = table();
        assert_eq!(table.len(), 4);
        let cases = [
            ("/v1", "/v1/index.html"),
            ("/v1/", "/v1/index.html"),
            ("/v2/", "/v2/index.html"),
        ];
        for (path, doc) in cases {
            let url = origin.join(path).unwrap();
            let resolved = table.resolve(&url, &origin).unwrap();
            assert_eq!(resolved.path(), doc);
        }
    }

    #[test]
    fn test_prefixes_and_other_paths_do_not_match() {
        let (table, origin) = table();
        for path in ["/v1/style.css", "/v3", "/", "/v1/index.html"] {
            assert!(table.resolve(&origin.join(path).unwrap(), &origin).is_none(), "{}", path);
        }
    }

    #[test]
    fn test_query_is_ignored_but_origin_is_not() {
        let (table, origin) = table();
        let busted = Url::parse("https://itswatuyusei.github.io/v2?ref=hub").unwrap();
        assert!(table.resolve(&busted, &origin).is_some());
        let foreign = Url::parse("https://elsewhere.example/v1").unwrap();
        assert!(table.resolve(&foreign, &origin).is_none());
    }
}
