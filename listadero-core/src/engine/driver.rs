use std::path::PathBuf;

use async_trait::async_trait;

use crate::listing::ResolutionStrategy;

use super::error::EngineResult;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PagePoint {
    pub x: f64,
    pub y: f64,
}

impl PagePoint {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn distance_to(&self, other: PagePoint) -> f64 {
        ((other.x - self.x).powi(2) + (other.y - self.y).powi(2)).sqrt()
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PageRect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl PageRect {
    pub fn center(&self) -> PagePoint {
        PagePoint::new(self.x + self.width / 2.0, self.y + self.height / 2.0)
    }
}

/// Opaque reference to a resolved page element. The epoch pins the handle to
/// the navigation generation it was resolved in; a handle from an older
/// epoch must never be acted on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ElementHandle {
    pub selector: String,
    pub epoch: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyInput {
    Char(char),
    Backspace,
}

/// Seam between the interaction engine and the live page. The production
/// implementation drives Chromium over CDP; tests substitute scripted fakes.
#[async_trait(?Send)]
pub trait PageDriver {
    async fn navigate(&mut self, url: &str) -> EngineResult<()>;

    /// Navigation generation, bumped on every completed navigation.
    fn epoch(&self) -> u64;

    async fn current_url(&mut self) -> EngineResult<String>;

    /// Probe one resolution strategy. `Ok(None)` means the strategy found
    /// nothing; errors are reserved for transport-level failures.
    async fn query(&mut self, strategy: &ResolutionStrategy)
        -> EngineResult<Option<ElementHandle>>;

    async fn is_attached(&mut self, handle: &ElementHandle) -> EngineResult<bool>;

    async fn bounding_box(&mut self, handle: &ElementHandle) -> EngineResult<PageRect>;

    async fn move_pointer(&mut self, point: PagePoint) -> EngineResult<()>;

    async fn click(&mut self, handle: &ElementHandle) -> EngineResult<()>;

    async fn clear_value(&mut self, handle: &ElementHandle) -> EngineResult<()>;

    async fn press_key(&mut self, handle: &ElementHandle, key: &KeyInput) -> EngineResult<()>;

    async fn read_value(&mut self, handle: &ElementHandle) -> EngineResult<String>;

    async fn select_option(&mut self, handle: &ElementHandle, value: &str) -> EngineResult<()>;

    async fn upload_files(&mut self, handle: &ElementHandle, files: &[PathBuf])
        -> EngineResult<()>;

    async fn screenshot(&mut self) -> EngineResult<Vec<u8>>;
}
