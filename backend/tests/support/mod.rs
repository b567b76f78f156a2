#![allow(dead_code)]
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use response_backend::{
    error::AppError,
    models::external_user::DirectoryProfile,
    services::directory::{DirectoryClient, DirectoryPage},
};

pub fn profile(id: &str, display_name: &str, full_name: &str, email: &str) -> DirectoryProfile {
    DirectoryProfile {
        id: id.to_string(),
        display_name: display_name.to_string(),
        full_name: full_name.to_string(),
        email: Some(email.to_string()),
        is_deleted: false,
        is_bot: false,
    }
}

pub fn renamed(profile: DirectoryProfile, display_name: &str) -> DirectoryProfile {
    DirectoryProfile {
        display_name: display_name.to_string(),
        ..profile
    }
}

pub fn spengler() -> DirectoryProfile {
    DirectoryProfile {
        is_deleted: true,
        ..profile(
            "W012A3CDE",
            "spengler",
            "Egon Spengler",
            "spengler@ghostbusters.example.com",
        )
    }
}

pub fn glinda() -> DirectoryProfile {
    profile(
        "U12345678",
        "Glinda the Fairly Good",
        "Glinda Southgood",
        "glenda@south.oz.coven",
    )
}

pub fn robot() -> DirectoryProfile {
    DirectoryProfile {
        is_bot: true,
        ..profile("B0BOT0001", "ci-bot", "CI Bot", "ci@bots.example.com")
    }
}

/// In-process directory double answering from fixed pages and profiles.
#[derive(Default)]
pub struct ScriptedDirectory {
    pages: Mutex<HashMap<Option<String>, DirectoryPage>>,
    profiles: Mutex<Vec<DirectoryProfile>>,
    failing_cursor: Mutex<Option<String>>,
    lookups: AtomicUsize,
    page_requests: AtomicUsize,
}

impl ScriptedDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serves `entries` as one page per element, chained with cursors `page2`, `page3`, ...
    pub fn with_pages(self, pages: Vec<Vec<DirectoryProfile>>) -> Self {
        self.set_pages(pages);
        self
    }

    pub fn with_profiles(self, profiles: Vec<DirectoryProfile>) -> Self {
        *self.profiles.lock().expect("profiles lock") = profiles;
        self
    }

    pub fn set_pages(&self, pages: Vec<Vec<DirectoryProfile>>) {
        let total = pages.len();
        let mut scripted = self.pages.lock().expect("pages lock");
        scripted.clear();
        for (index, entries) in pages.into_iter().enumerate() {
            let cursor = (index > 0).then(|| format!("page{}", index + 1));
            let next_cursor = (index + 1 < total).then(|| format!("page{}", index + 2));
            scripted.insert(
                cursor,
                DirectoryPage {
                    entries,
                    next_cursor,
                },
            );
        }
    }

    pub fn fail_at(&self, cursor: &str) {
        *self.failing_cursor.lock().expect("cursor lock") = Some(cursor.to_string());
    }

    pub fn lookups(&self) -> usize {
        self.lookups.load(Ordering::SeqCst)
    }

    pub fn page_requests(&self) -> usize {
        self.page_requests.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DirectoryClient for ScriptedDirectory {
    async fn lookup_by_id(&self, id: &str) -> Result<Option<DirectoryProfile>, AppError> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        tokio::task::yield_now().await;
        Ok(self
            .profiles
            .lock()
            .expect("profiles lock")
            .iter()
            .find(|p| p.id == id)
            .cloned())
    }

    async fn lookup_by_email(&self, email: &str) -> Result<Option<DirectoryProfile>, AppError> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        tokio::task::yield_now().await;
        Ok(self
            .profiles
            .lock()
            .expect("profiles lock")
            .iter()
            .find(|p| p.email.as_deref() == Some(email))
            .cloned())
    }

    async fn list_page(
        &self,
        cursor: Option<String>,
        _page_size: u32,
    ) -> Result<DirectoryPage, AppError> {
        self.page_requests.fetch_add(1, Ordering::SeqCst);
        if cursor.is_some() && *self.failing_cursor.lock().expect("cursor lock") == cursor {
            return Err(AppError::directory("directory went away"));
        }
        self.pages
            .lock()
            .expect("pages lock")
            .get(&cursor)
            .cloned()
            .ok_or_else(|| AppError::directory(format!("unknown cursor {cursor:?}")))
    }
}
