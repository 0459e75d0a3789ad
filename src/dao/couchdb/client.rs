use std::{sync::Arc, time::Duration};

use reqwest::{Client, Method, StatusCode};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::{Value, json};
use tracing::{debug, info};

use super::{
    config::CouchConfig,
    error::{CouchDaoError, CouchResult},
    models::{ChangesResponse, DESIGN_DOC_ID, DesignDocument, UpdateReply, update_path},
};

/// How many times a conflicting write is replayed before giving up.
pub const WRITE_ATTEMPTS: u32 = 5;

const CHANGES: &str = "_changes";

/// Minimal projection used to learn a document's current revision and version.
#[derive(Debug, Deserialize)]
pub struct RevisionStub {
    #[serde(rename = "_rev")]
    pub rev: String,
    #[serde(default)]
    pub version: Option<u64>,
}

/// Thin HTTP client bound to one CouchDB database; clones share the connection pool.
#[derive(Clone)]
pub struct CouchClient {
    client: Client,
    base_url: Arc<str>,
    database: Arc<str>,
    auth: Option<(Arc<str>, Arc<str>)>,
    longpoll: Duration,
}

impl CouchClient {
    /// Establish a connection, ensuring the database and update handlers exist.
    pub async fn connect(config: CouchConfig) -> CouchResult<Self> {
        let client = Client::builder()
            .build()
            .map_err(|source| CouchDaoError::ClientBuilder { source })?;

        let base_url = Arc::<str>::from(config.base_url.trim_end_matches('/'));
        let database = Arc::<str>::from(config.database);
        let auth = config
            .username
            .zip(config.password)
            .map(|(u, p)| (Arc::<str>::from(u), Arc::<str>::from(p)));

        let couch = Self {
            client,
            base_url,
            database,
            auth,
            longpoll: config.longpoll,
        };

        couch.ensure_database().await?;
        couch.ensure_design_doc().await?;
        Ok(couch)
    }

    fn request(&self, method: Method, path: &str) -> reqwest::RequestBuilder {
        let url = format!("{}/{}/{}", self.base_url, self.database, path);
        self.authorize(self.client.request(method, url))
    }

    fn authorize(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        if let Some((ref user, ref pass)) = self.auth {
            builder.basic_auth(user.as_ref(), Some(pass.as_ref()))
        } else {
            builder
        }
    }

    async fn ensure_database(&self) -> CouchResult<()> {
        let database = self.database.to_string();
        let url = format!("{}/{}", self.base_url, self.database);

        let response = self
            .authorize(self.client.get(&url))
            .send()
            .await
            .map_err(|source| CouchDaoError::DatabaseQuery {
                database: database.clone(),
                source,
            })?;

        match response.status() {
            StatusCode::OK => Ok(()),
            StatusCode::NOT_FOUND => {
                let create = self
                    .authorize(self.client.put(&url))
                    .send()
                    .await
                    .map_err(|source| CouchDaoError::DatabaseCreate {
                        database: database.clone(),
                        source,
                    })?;
                if create.status().is_success() {
                    info!(database = %database, "created CouchDB database");
                    Ok(())
                } else {
                    Err(CouchDaoError::DatabaseStatus {
                        database,
                        status: create.status(),
                    })
                }
            }
            other => Err(CouchDaoError::DatabaseStatus {
                database,
                status: other,
            }),
        }
    }

    async fn ensure_design_doc(&self) -> CouchResult<()> {
        let mut wanted = DesignDocument::handlers();
        if let Some(existing) = self.get_document::<DesignDocument>(DESIGN_DOC_ID).await? {
            if existing.updates == wanted.updates {
                return Ok(());
            }
            wanted.rev = existing.rev;
        }
        self.put_document(DESIGN_DOC_ID, &wanted).await?;
        debug!("installed CouchDB update handlers");
        Ok(())
    }

    pub async fn get_document<T>(&self, doc_id: &str) -> CouchResult<Option<T>>
    where
        T: DeserializeOwned,
    {
        let response = self
            .request(Method::GET, doc_id)
            .send()
            .await
            .map_err(|source| CouchDaoError::RequestSend {
                path: doc_id.to_string(),
                source,
            })?;

        match response.status() {
            StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => {
                response.json::<T>().await.map(Some).map_err(|source| {
                    CouchDaoError::DecodeResponse {
                        path: doc_id.to_string(),
                        source,
                    }
                })
            }
            other => Err(CouchDaoError::RequestStatus {
                path: doc_id.to_string(),
                status: other,
            }),
        }
    }

    /// Write a document; a stale `_rev` surfaces as [`CouchDaoError::Conflict`].
    pub async fn put_document<T>(&self, doc_id: &str, document: &T) -> CouchResult<()>
    where
        T: ?Sized + Serialize,
    {
        let response = self
            .request(Method::PUT, doc_id)
            .json(document)
            .send()
            .await
            .map_err(|source| CouchDaoError::RequestSend {
                path: doc_id.to_string(),
                source,
            })?;

        match response.status() {
            status if status.is_success() => Ok(()),
            StatusCode::CONFLICT => Err(CouchDaoError::Conflict {
                doc_id: doc_id.to_string(),
                attempts: 1,
            }),
            other => Err(CouchDaoError::RequestStatus {
                path: doc_id.to_string(),
                status: other,
            }),
        }
    }

    /// Delete the current revision of a document; a missing document is not an error.
    pub async fn delete_document(&self, doc_id: &str) -> CouchResult<()> {
        for _ in 0..WRITE_ATTEMPTS {
            let Some(stub) = self.get_document::<RevisionStub>(doc_id).await? else {
                return Ok(());
            };
            let response = self
                .request(Method::DELETE, doc_id)
                .query(&[("rev", stub.rev.as_str())])
                .send()
                .await
                .map_err(|source| CouchDaoError::RequestSend {
                    path: doc_id.to_string(),
                    source,
                })?;
            match response.status() {
                status if status.is_success() => return Ok(()),
                StatusCode::NOT_FOUND => return Ok(()),
                StatusCode::CONFLICT => continue,
                other => {
                    return Err(CouchDaoError::RequestStatus {
                        path: doc_id.to_string(),
                        status: other,
                    });
                }
            }
        }
        Err(CouchDaoError::Conflict {
            doc_id: doc_id.to_string(),
            attempts: WRITE_ATTEMPTS,
        })
    }

    /// Run a design-document update handler against `doc_id`.
    ///
    /// Handlers answer 404 when the document is gone and 410 when the addressed entry is.
    pub async fn call_update(
        &self,
        handler: &str,
        doc_id: &str,
        body: &Value,
    ) -> CouchResult<UpdateReply> {
        let path = update_path(handler, doc_id);
        for attempt in 1..=WRITE_ATTEMPTS {
            let response = self
                .request(Method::PUT, &path)
                .json(body)
                .send()
                .await
                .map_err(|source| CouchDaoError::RequestSend {
                    path: path.clone(),
                    source,
                })?;

            match response.status() {
                status if status.is_success() => {
                    let raw = response
                        .text()
                        .await
                        .map_err(|source| CouchDaoError::DecodeResponse {
                            path: path.clone(),
                            source,
                        })?;
                    return serde_json::from_str(&raw).map_err(|source| {
                        CouchDaoError::DeserializeValue {
                            path: path.clone(),
                            source,
                        }
                    });
                }
                StatusCode::CONFLICT => {
                    debug!(handler, doc_id, attempt, "update handler lost revision race");
                }
                StatusCode::NOT_FOUND => {
                    return Err(CouchDaoError::MissingDocument {
                        doc_id: doc_id.to_string(),
                    });
                }
                StatusCode::GONE => {
                    return Err(CouchDaoError::MissingEntry {
                        doc_id: doc_id.to_string(),
                    });
                }
                other => {
                    return Err(CouchDaoError::RequestStatus { path, status: other });
                }
            }
        }
        Err(CouchDaoError::Conflict {
            doc_id: doc_id.to_string(),
            attempts: WRITE_ATTEMPTS,
        })
    }

    /// One longpoll round of the `_changes` feed restricted to `doc_ids`.
    pub async fn fetch_changes(
        &self,
        doc_ids: &[String],
        since: &Value,
    ) -> CouchResult<ChangesResponse> {
        let since = match since {
            Value::String(raw) => raw.clone(),
            other => other.to_string(),
        };
        let timeout = self.longpoll.as_millis().to_string();
        let response = self
            .request(Method::POST, CHANGES)
            .query(&[
                ("feed", "longpoll"),
                ("filter", "_doc_ids"),
                ("include_docs", "true"),
                ("since", since.as_str()),
                ("timeout", timeout.as_str()),
            ])
            .timeout(self.longpoll + Duration::from_secs(10))
            .json(&json!({ "doc_ids": doc_ids }))
            .send()
            .await
            .map_err(|source| CouchDaoError::RequestSend {
                path: CHANGES.to_string(),
                source,
            })?;

        if !response.status().is_success() {
            return Err(CouchDaoError::RequestStatus {
                path: CHANGES.to_string(),
                status: response.status(),
            });
        }

        response
            .json::<ChangesResponse>()
            .await
            .map_err(|source| CouchDaoError::DecodeResponse {
                path: CHANGES.to_string(),
                source,
            })
    }

    /// Check that the database still answers.
    pub async fn health_check(&self) -> CouchResult<()> {
        let url = format!("{}/{}", self.base_url, self.database);
        let response = self
            .authorize(self.client.get(&url))
            .send()
            .await
            .map_err(|source| CouchDaoError::RequestSend {
                path: url.clone(),
                source,
            })?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(CouchDaoError::RequestStatus {
                path: url,
                status: response.status(),
            })
        }
    }
}
