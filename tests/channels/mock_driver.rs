//! Scriptable in-memory browser driver.

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use herald::driver::{BrowserDriver, ClickMode, DriverError, Key, Locator, PageState};

/// Elements "exist" when their selector contains one of `present`.
#[derive(Default)]
pub struct MockDriver {
    pub present: Vec<&'static str>,
    pub fail_keys: Vec<Key>,
    pub login_polls: usize,
    pub log: Mutex<Vec<String>>,
    pub page_reads: AtomicUsize,
    pub url: Mutex<String>,
}

impl MockDriver {
    pub fn with_present(present: &[&'static str]) -> Self {
        Self {
            present: present.to_vec(),
            ..Self::default()
        }
    }

    pub fn log(&self) -> Vec<String> {
        self.log.lock().expect("lock").clone()
    }

    pub fn contains(&self, entry: &str) -> bool {
        self.log().iter().any(|e| e == entry)
    }

    fn exists(&self, locator: &Locator) -> bool {
        self.present.iter().any(|p| locator.selector().contains(p))
    }

    fn act(&self, locator: &Locator, entry: String) -> Result<(), DriverError> {
        if !self.exists(locator) {
            return Err(DriverError::NotFound(locator.selector().to_owned()));
        }
        self.log.lock().expect("lock").push(entry);
        Ok(())
    }
}

#[async_trait]
impl BrowserDriver for MockDriver {
    async fn navigate(&self, url: &str) -> Result<(), DriverError> {
        *self.url.lock().expect("lock") = url.to_owned();
        self.log.lock().expect("lock").push(format!("navigate:{url}"));
        Ok(())
    }

    async fn locate(&self, locator: &Locator) -> Result<bool, DriverError> {
        Ok(self.exists(locator))
    }

    async fn click(&self, locator: &Locator, mode: ClickMode) -> Result<(), DriverError> {
        self.act(locator, format!("click:{mode:?}:{}", locator.selector()))
    }

    async fn type_text(&self, locator: &Locator, text: &str) -> Result<(), DriverError> {
        self.act(locator, format!("type:{text}"))
    }

    async fn press_key(&self, locator: &Locator, key: Key) -> Result<(), DriverError> {
        if self.fail_keys.contains(&key) {
            return Err(DriverError::Bridge(format!("{} rejected", key.as_str())));
        }
        self.act(locator, format!("press:{}", key.as_str()))
    }

    async fn upload_file(&self, locator: &Locator, path: &Path) -> Result<(), DriverError> {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        self.act(locator, format!("upload:{name}"))
    }

    async fn page_state(&self) -> Result<PageState, DriverError> {
        let reads = self.page_reads.fetch_add(1, Ordering::SeqCst);
        let url = if reads < self.login_polls {
            "https://m.example/login/".to_owned()
        } else {
            self.url.lock().expect("lock").clone()
        };
        Ok(PageState {
            url,
            title: "mock".to_owned(),
        })
    }

    async fn close(&self) -> Result<(), DriverError> {
        self.log.lock().expect("lock").push("close".to_owned());
        Ok(())
    }
}
