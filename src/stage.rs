//! Script-visible graphics bookkeeping.
//!
//! The stage tracks what scripts have created (pictures, windows, casts, text)
//! and which drawing operations they requested since the last render. It never
//! touches pixels: a [`Renderer`](crate::host::Renderer) receives a
//! [`StageSnapshot`] and does the compositing.

use std::collections::{BTreeMap, VecDeque};

use serde::{Deserialize, Serialize};

pub type PictureId = i64;
pub type WindowId = i64;
pub type CastId = i64;

/// Draw operations kept for a renderer that has not caught up. Older ones are dropped.
pub const MAX_PENDING_DRAW_OPS: usize = 4096;
/// Text items kept on stage. One per picture position; the oldest go first.
pub const MAX_TEXT_ITEMS: usize = 1024;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Picture {
    pub id: PictureId,
    pub width: u32,
    pub height: u32,
    /// Asset path for loaded pictures, `None` for pictures created by script.
    pub source: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Window {
    pub id: WindowId,
    pub picture: PictureId,
    pub x: i64,
    pub y: i64,
    pub width: i64,
    pub height: i64,
    /// Offset of the visible area inside the picture.
    pub pic_x: i64,
    pub pic_y: i64,
    pub color: i64,
}

/// A sprite placed on a destination picture. Mirrors the 12-slot `PutCast` layout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cast {
    pub id: CastId,
    pub picture: PictureId,
    pub dest: PictureId,
    pub x: i64,
    pub y: i64,
    /// Transparent color, -1 for none.
    pub transparent: i64,
    pub src_x: i64,
    pub src_y: i64,
    pub width: i64,
    pub height: i64,
    pub dest_width: i64,
    pub dest_height: i64,
    pub mode: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextItem {
    pub picture: PictureId,
    pub x: i64,
    pub y: i64,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DrawOp {
    MovePic {
        src: PictureId,
        src_x: i64,
        src_y: i64,
        width: i64,
        height: i64,
        dest: PictureId,
        dest_x: i64,
        dest_y: i64,
        mode: i64,
    },
    TextWrite(TextItem),
}

/// Read-only copy of the stage handed to renderers.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StageSnapshot {
    pub pictures: Vec<Picture>,
    pub windows: Vec<Window>,
    pub casts: Vec<Cast>,
    pub texts: Vec<TextItem>,
    pub draw_ops: Vec<DrawOp>,
}

#[derive(Debug, Clone, Default)]
pub struct Stage {
    pictures: BTreeMap<PictureId, Picture>,
    windows: BTreeMap<WindowId, Window>,
    casts: BTreeMap<CastId, Cast>,
    texts: VecDeque<TextItem>,
    draw_ops: VecDeque<DrawOp>,
    revision: u64,
    next_picture: PictureId,
    next_window: WindowId,
    next_cast: CastId,
}

impl Stage {
    pub fn new() -> Self {
        Default::default()
    }

    /// Bumped by every change, so that observers can skip unchanged stages.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    fn touch(&mut self) {
        self.revision = self.revision.wrapping_add(1);
    }

    fn add_picture(&mut self, width: u32, height: u32, source: Option<String>) -> PictureId {
        self.touch();
        let id = self.next_picture;
        self.next_picture += 1;
        self.pictures.insert(
            id,
            Picture {
                id,
                width,
                height,
                source,
            },
        );
        id
    }

    pub fn load_picture(&mut self, path: &str, width: u32, height: u32) -> PictureId {
        self.add_picture(width, height, Some(path.to_owned()))
    }

    pub fn create_picture(&mut self, width: u32, height: u32) -> PictureId {
        self.add_picture(width, height, None)
    }

    /// New blank picture with the size of `src`.
    pub fn copy_picture(&mut self, src: PictureId) -> Option<PictureId> {
        let (width, height) = self.picture_size(src)?;
        Some(self.add_picture(width, height, None))
    }

    pub fn delete_picture(&mut self, id: PictureId) -> bool {
        self.touch();
        self.texts.retain(|t| t.picture != id);
        self.pictures.remove(&id).is_some()
    }

    pub fn picture(&self, id: PictureId) -> Option<&Picture> {
        self.pictures.get(&id)
    }

    pub fn picture_size(&self, id: PictureId) -> Option<(u32, u32)> {
        self.pictures.get(&id).map(|p| (p.width, p.height))
    }

    /// Opens a window. A zero width or height falls back to the picture's size.
    #[allow(clippy::too_many_arguments)]
    pub fn open_window(
        &mut self,
        picture: PictureId,
        x: i64,
        y: i64,
        width: i64,
        height: i64,
        pic_x: i64,
        pic_y: i64,
        color: i64,
    ) -> WindowId {
        self.touch();
        let (pic_w, pic_h) = self.picture_size(picture).unwrap_or((0, 0));
        let id = self.next_window;
        self.next_window += 1;
        self.windows.insert(
            id,
            Window {
                id,
                picture,
                x,
                y,
                width: if width == 0 { pic_w as i64 } else { width },
                height: if height == 0 { pic_h as i64 } else { height },
                pic_x,
                pic_y,
                color,
            },
        );
        id
    }

    pub fn move_window(&mut self, id: WindowId, x: i64, y: i64) -> bool {
        self.touch();
        match self.windows.get_mut(&id) {
            Some(window) => {
                window.x = x;
                window.y = y;
                true
            }
            None => false,
        }
    }

    pub fn close_window(&mut self, id: WindowId) -> bool {
        self.touch();
        self.windows.remove(&id).is_some()
    }

    pub fn window(&self, id: WindowId) -> Option<&Window> {
        self.windows.get(&id)
    }

    /// Places a cast. `cast.id` is assigned here; zero sizes mean the whole picture.
    pub fn put_cast(&mut self, mut cast: Cast) -> CastId {
        self.touch();
        let (pic_w, pic_h) = self.picture_size(cast.picture).unwrap_or((0, 0));
        if cast.width == 0 {
            cast.width = pic_w as i64;
        }
        if cast.height == 0 {
            cast.height = pic_h as i64;
        }
        let id = self.next_cast;
        self.next_cast += 1;
        cast.id = id;
        self.casts.insert(id, cast);
        id
    }

    pub fn move_cast(
        &mut self,
        id: CastId,
        x: i64,
        y: i64,
        source: Option<(i64, i64, i64, i64)>,
    ) -> bool {
        self.touch();
        let Some(cast) = self.casts.get_mut(&id) else {
            return false;
        };
        cast.x = x;
        cast.y = y;
        if let Some((src_x, src_y, width, height)) = source {
            cast.src_x = src_x;
            cast.src_y = src_y;
            if width != 0 {
                cast.width = width;
            }
            if height != 0 {
                cast.height = height;
            }
        }
        true
    }

    pub fn delete_cast(&mut self, id: CastId) -> bool {
        self.touch();
        self.casts.remove(&id).is_some()
    }

    pub fn cast(&self, id: CastId) -> Option<&Cast> {
        self.casts.get(&id)
    }

    /// Writes text on a picture. It replaces whatever text was at the same spot.
    pub fn text_write(&mut self, item: TextItem) {
        self.texts
            .retain(|t| (t.picture, t.x, t.y) != (item.picture, item.x, item.y));
        if self.texts.len() >= MAX_TEXT_ITEMS {
            self.texts.pop_front();
        }
        self.texts.push_back(item.clone());
        self.draw(DrawOp::TextWrite(item));
    }

    pub fn draw(&mut self, op: DrawOp) {
        self.touch();
        if self.draw_ops.len() >= MAX_PENDING_DRAW_OPS {
            self.draw_ops.pop_front();
        }
        self.draw_ops.push_back(op);
    }

    pub fn draw_ops(&self) -> &VecDeque<DrawOp> {
        &self.draw_ops
    }

    pub fn texts(&self) -> &VecDeque<TextItem> {
        &self.texts
    }

    /// Forgets the first `count` draw operations, once a renderer has seen them.
    pub fn clear_draw_ops(&mut self, count: usize) {
        let count = count.min(self.draw_ops.len());
        if count > 0 {
            self.touch();
            self.draw_ops.drain(..count);
        }
    }

    pub fn snapshot(&self) -> StageSnapshot {
        StageSnapshot {
            pictures: self.pictures.values().cloned().collect(),
            windows: self.windows.values().cloned().collect(),
            casts: self.casts.values().cloned().collect(),
            texts: self.texts.iter().cloned().collect(),
            draw_ops: self.draw_ops.iter().cloned().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_allocated_per_kind() {
        let mut stage = Stage::new();
        let a = stage.create_picture(64, 32);
        let b = stage.load_picture("title.bmp", 640, 480);
        assert_eq!((a, b), (0, 1));
        let win = stage.open_window(b, 0, 0, 0, 0, 0, 0, 0);
        assert_eq!(win, 0);
        let window = stage.window(win).unwrap();
        assert_eq!((window.width, window.height), (640, 480));
    }

    #[test]
    fn copy_picture_keeps_size() {
        let mut stage = Stage::new();
        let src = stage.create_picture(10, 20);
        let copy = stage.copy_picture(src).unwrap();
        assert_eq!(stage.picture_size(copy), Some((10, 20)));
        assert_eq!(stage.copy_picture(99), None);
    }

    #[test]
    fn cast_defaults_to_whole_picture() {
        let mut stage = Stage::new();
        let pic = stage.create_picture(16, 16);
        let id = stage.put_cast(Cast {
            id: -1,
            picture: pic,
            dest: 0,
            x: 5,
            y: 6,
            transparent: -1,
            src_x: 0,
            src_y: 0,
            width: 0,
            height: 0,
            dest_width: 0,
            dest_height: 0,
            mode: 1,
        });
        let cast = stage.cast(id).unwrap();
        assert_eq!((cast.width, cast.height), (16, 16));
        assert!(stage.move_cast(id, 1, 2, None));
        assert_eq!(stage.cast(id).map(|c| (c.x, c.y)), Some((1, 2)));
        assert!(stage.delete_cast(id));
        assert!(!stage.move_cast(id, 0, 0, None));
    }

    #[test]
    fn draw_ops_are_cleared_after_render() {
        let mut stage = Stage::new();
        stage.text_write(TextItem {
            picture: 0,
            x: 0,
            y: 0,
            text: "hello".into(),
        });
        assert_eq!(stage.snapshot().draw_ops.len(), 1);
        stage.clear_draw_ops(1);
        assert!(stage.draw_ops().is_empty());
        assert_eq!(stage.snapshot().texts.len(), 1);
    }

    #[test]
    fn text_at_the_same_spot_is_replaced() {
        let mut stage = Stage::new();
        for n in 0..10 {
            stage.text_write(TextItem {
                picture: 0,
                x: 4,
                y: 8,
                text: n.to_string(),
            });
        }
        assert_eq!(stage.texts().len(), 1);
        assert_eq!(stage.texts()[0].text, "9");
        stage.create_picture(1, 1);
        stage.delete_picture(0);
        assert!(stage.texts().is_empty());
    }

    #[test]
    fn undrained_stage_stays_bounded() {
        let mut stage = Stage::new();
        for n in 0..(MAX_PENDING_DRAW_OPS as i64 + MAX_TEXT_ITEMS as i64) {
            stage.text_write(TextItem {
                picture: 0,
                x: n,
                y: 0,
                text: "x".into(),
            });
        }
        assert_eq!(stage.texts().len(), MAX_TEXT_ITEMS);
        assert_eq!(stage.draw_ops().len(), MAX_PENDING_DRAW_OPS);
        // The newest survive.
        assert_eq!(
            stage.texts().back().map(|t| t.x),
            Some(MAX_PENDING_DRAW_OPS as i64 + MAX_TEXT_ITEMS as i64 - 1)
        );
    }

    #[test]
    fn revision_moves_on_change_only() {
        let mut stage = Stage::new();
        let start = stage.revision();
        stage.clear_draw_ops(10);
        assert_eq!(stage.revision(), start);
        stage.create_picture(2, 2);
        assert_ne!(stage.revision(), start);
    }
}
