#[cfg(feature = "cli")]
use std::{fs, path::Path};

#[cfg(feature = "cli")]
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::http::{Header, HttpRequest};

fn default_method() -> String {
    "GET".to_string()
}

/// One saved request plus its scripts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestItem {
    #[serde(default)]
    pub id: String,
    pub name: String,
    #[serde(default = "default_method")]
    pub method: String,
    pub url: String,
    #[serde(default)]
    pub headers: Vec<Header>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pre_request_script: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub post_response_script: Option<String>,
}

impl RequestItem {
    pub fn new(name: impl Into<String>, method: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            id: String::new(),
            name: name.into(),
            method: method.into(),
            url: url.into(),
            headers: Vec::new(),
            body: None,
            pre_request_script: None,
            post_response_script: None,
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push(Header::new(name, value));
        self
    }

    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = Some(body.into());
        self
    }

    pub fn with_pre_request_script(mut self, script: impl Into<String>) -> Self {
        self.pre_request_script = Some(script.into());
        self
    }

    pub fn with_post_response_script(mut self, script: impl Into<String>) -> Self {
        self.post_response_script = Some(script.into());
        self
    }

    /// Unresolved outgoing request; placeholders are expanded later.
    pub fn to_http_request(&self) -> HttpRequest {
        HttpRequest {
            method: self.method.to_ascii_uppercase(),
            url: self.url.clone(),
            headers: self.headers.clone(),
            body: self.body.clone(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Folder {
    pub name: String,
    #[serde(default)]
    pub requests: Vec<RequestItem>,
    #[serde(default)]
    pub folders: Vec<Folder>,
}

impl Folder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn with_request(mut self, request: RequestItem) -> Self {
        self.requests.push(request);
        self
    }

    pub fn with_folder(mut self, folder: Folder) -> Self {
        self.folders.push(folder);
        self
    }

    /// Requests in run order: own requests first, then each subfolder in turn.
    pub fn flatten(&self) -> Vec<&RequestItem> {
        let mut out = Vec::new();
        collect(&self.requests, &self.folders, &mut out);
        out
    }
}

fn collect<'a>(requests: &'a [RequestItem], folders: &'a [Folder], out: &mut Vec<&'a RequestItem>) {
    out.extend(requests.iter());
    for folder in folders {
        collect(&folder.requests, &folder.folders, out);
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Collection {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub requests: Vec<RequestItem>,
    #[serde(default)]
    pub folders: Vec<Folder>,
}

impl Collection {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn with_request(mut self, request: RequestItem) -> Self {
        self.requests.push(request);
        self
    }

    pub fn with_folder(mut self, folder: Folder) -> Self {
        self.folders.push(folder);
        self
    }

    pub fn flatten(&self) -> Vec<&RequestItem> {
        let mut out = Vec::new();
        collect(&self.requests, &self.folders, &mut out);
        out
    }

    /// Looks up a folder by `/`-separated names, e.g. `users/admin`.
    pub fn folder(&self, path: &str) -> Option<&Folder> {
        let mut segments = path.split('/').map(str::trim).filter(|s| !s.is_empty());
        let first = segments.next()?;
        let mut current = self.folders.iter().find(|f| f.name == first)?;
        for segment in segments {
            current = current.folders.iter().find(|f| f.name == segment)?;
        }
        Some(current)
    }
}

#[cfg(feature = "cli")]
pub fn load_collection(path: &Path) -> Result<Collection> {
    let contents = fs::read_to_string(path)
        .with_context(|| format!("reading collection {}", path.display()))?;
    let collection: Collection = serde_json::from_str(&contents)
        .with_context(|| format!("parsing collection {}", path.display()))?;
    Ok(collection)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn sample() -> Collection {
        Collection::new("shop")
            .with_request(RequestItem::new("root", "GET", "/root"))
            .with_folder(
                Folder::new("users")
                    .with_request(RequestItem::new("list users", "GET", "/users"))
                    .with_folder(
                        Folder::new("admin").with_request(RequestItem::new("admins", "GET", "/admins")),
                    )
                    .with_request(RequestItem::new("create user", "POST", "/users")),
            )
            .with_folder(Folder::new("orders").with_request(RequestItem::new("orders", "GET", "/orders")))
    }

    fn names(items: &[&RequestItem]) -> Vec<String> {
        items.iter().map(|r| r.name.clone()).collect()
    }

    #[test]
    fn flattens_depth_first_with_own_requests_first() {
        assert_eq!(
            names(&sample().flatten()),
            vec!["root", "list users", "create user", "admins", "orders"]
        );
    }

    #[test]
    fn finds_nested_folders_by_path() {
        let collection = sample();
        let admin = collection.folder("users/admin").expect("admin folder");
        assert_eq!(names(&admin.flatten()), vec!["admins"]);
        assert_eq!(
            names(&collection.folder("/users/").unwrap().flatten()),
            vec!["list users", "create user", "admins"]
        );
        assert!(collection.folder("users/missing").is_none());
        assert!(collection.folder("").is_none());
    }

    #[test]
    fn deserializes_camel_case_documents() {
        let json = r#"{
            "name": "api",
            "requests": [{
                "name": "login",
                "method": "post",
                "url": "{{base}}/login",
                "headers": [{"name": "Accept", "value": "application/json"}],
                "preRequestScript": "env.set(\"a\", \"1\");",
                "postResponseScript": "test(\"ok\", || expect(response.code).toBe(200));"
            }]
        }"#;
        let collection: Collection = serde_json::from_str(json).unwrap();
        let request = &collection.requests[0];
        assert!(request.pre_request_script.is_some());
        let http = request.to_http_request();
        assert_eq!(http.method, "POST");
        assert_eq!(http.header("accept"), Some("application/json"));
    }
}
