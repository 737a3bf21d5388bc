//! Terminal presentation layer: kitty graphics output for the painted
//! surface and a stateful mapper from crossterm events to viewport gestures.

use std::io::{self, Write};

use anyhow::Result;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use crossterm::{
    cursor,
    event::{Event, KeyCode, KeyEvent, KeyModifiers, MouseButton, MouseEvent, MouseEventKind},
    terminal::{Clear, ClearType},
};
use paperview_core::{PointerButton, Surface};
use png::{BitDepth, ColorType, Encoder};

pub struct KittyRenderer<W: Write> {
    writer: W,
    image_id: u32,
    placement_id: u32,
}

pub struct DrawParams {
    pub columns: u32,
    pub rows: u32,
}

impl DrawParams {
    pub fn clamped(columns: u32, rows: u32) -> Self {
        Self {
            columns: columns.max(1),
            rows: rows.max(1),
        }
    }
}

impl<W: Write> KittyRenderer<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer,
            image_id: 1,
            placement_id: 1,
        }
    }

    pub fn writer(&mut self) -> &mut W {
        &mut self.writer
    }

    /// Transmit the surface as a PNG placement covering the given cell grid.
    pub fn draw(&mut self, surface: &Surface, params: DrawParams) -> Result<()> {
        let mut buffer = Vec::new();
        let mut encoder = Encoder::new(&mut buffer, surface.width, surface.height);
        encoder.set_color(ColorType::Rgba);
        encoder.set_depth(BitDepth::Eight);
        let mut writer = encoder.write_header()?;
        writer.write_image_data(&surface.pixels)?;
        writer.finish()?;

        let encoded = BASE64.encode(&buffer);
        let mut chunks = encoded.as_bytes().chunks(4096).peekable();
        let mut first = true;

        while let Some(chunk) = chunks.next() {
            let more = chunks.peek().is_some();
            if first {
                write!(
                    self.writer,
                    "\u{1b}_Ga=T,f=100,C=1,q=2,i={},p={},c={},r={},s={},v={},z=-1,m={}",
                    self.image_id,
                    self.placement_id,
                    params.columns,
                    params.rows,
                    surface.width,
                    surface.height,
                    if more { 1 } else { 0 }
                )?;
                first = false;
            } else {
                write!(self.writer, "\u{1b}_Gm={},q=2", if more { 1 } else { 0 })?;
            }
            if !chunk.is_empty() {
                self.writer.write_all(b";")?;
                self.writer.write_all(chunk)?;
            }
            write!(self.writer, "\u{1b}\\")?;
        }

        self.writer.flush()?;
        Ok(())
    }

    pub fn begin_sync_update(&mut self) -> Result<()> {
        write!(self.writer, "\u{1b}[?2026h")?;
        Ok(())
    }

    /// Disables synchronized updates.
    /// The terminal will render all buffered changes at once.
    pub fn end_sync_update(&mut self) -> Result<()> {
        write!(self.writer, "\u{1b}[?2026l")?;
        self.writer.flush()?;
        Ok(())
    }

    /// Clears the entire screen.
    pub fn clear_all(&mut self) -> Result<()> {
        crossterm::execute!(
            &mut self.writer,
            Clear(ClearType::All),
            cursor::MoveTo(0, 0)
        )?;
        Ok(())
    }
}

pub fn write_status_line<W: Write>(writer: &mut W, label: &str) -> io::Result<()> {
    write!(writer, "{}", label)?;
    writer.flush()
}

/// A viewport gesture decoded from terminal input. Mouse coordinates are in
/// cells; the host converts them to surface pixels with its cell metrics.
#[derive(Debug, Clone, PartialEq)]
pub enum ViewportEvent {
    Scroll {
        delta_x: f32,
        delta_y: f32,
    },
    /// Zoom step, optionally anchored at a cell position (mouse wheel);
    /// unanchored steps zoom around the viewport center.
    Zoom {
        delta: f32,
        anchor: Option<(u16, u16)>,
    },
    ZoomReset,
    Click {
        column: u16,
        row: u16,
        button: PointerButton,
    },
    CenterPage,
    Rotate,
    GotoStart,
    GotoEnd,
    Quit,
    None,
}

/// Stateful key/mouse decoder. Numeric prefixes multiply the next scroll
/// step, vi style: `3j` scrolls three steps down.
#[derive(Debug, Default)]
pub struct GestureMapper {
    pending_count: Option<usize>,
    pending_digits: String,
}

impl GestureMapper {
    pub const SCROLL_STEP: f32 = 50.0;
    pub const ZOOM_STEP: f32 = 0.1;

    pub fn new() -> Self {
        Self::default()
    }

    pub fn map_event(&mut self, event: Event) -> ViewportEvent {
        match event {
            Event::Key(KeyEvent {
                code, modifiers, ..
            }) => self.map_key(code, modifiers),
            Event::Mouse(mouse) => self.map_mouse(mouse),
            _ => ViewportEvent::None,
        }
    }

    fn map_key(&mut self, code: KeyCode, modifiers: KeyModifiers) -> ViewportEvent {
        match (code, modifiers) {
            (KeyCode::Char(c), KeyModifiers::NONE) if c.is_ascii_digit() => {
                if let Some(digit) = c.to_digit(10) {
                    self.push_digit(digit as usize);
                }
                ViewportEvent::None
            }
            (KeyCode::Up, modifiers) if modifiers.contains(KeyModifiers::CONTROL) => {
                self.reset_count();
                ViewportEvent::Zoom {
                    delta: Self::ZOOM_STEP,
                    anchor: None,
                }
            }
            (KeyCode::Down, modifiers) if modifiers.contains(KeyModifiers::CONTROL) => {
                self.reset_count();
                ViewportEvent::Zoom {
                    delta: -Self::ZOOM_STEP,
                    anchor: None,
                }
            }
            (KeyCode::Char('j'), KeyModifiers::NONE) | (KeyCode::Down, KeyModifiers::NONE) => {
                self.scroll(0.0, Self::SCROLL_STEP)
            }
            (KeyCode::Char('k'), KeyModifiers::NONE) | (KeyCode::Up, KeyModifiers::NONE) => {
                self.scroll(0.0, -Self::SCROLL_STEP)
            }
            (KeyCode::Char('h'), KeyModifiers::NONE) | (KeyCode::Left, KeyModifiers::NONE) => {
                self.scroll(-Self::SCROLL_STEP, 0.0)
            }
            (KeyCode::Char('l'), KeyModifiers::NONE) | (KeyCode::Right, KeyModifiers::NONE) => {
                self.scroll(Self::SCROLL_STEP, 0.0)
            }
            (KeyCode::Char('+'), _) => {
                self.reset_count();
                ViewportEvent::Zoom {
                    delta: Self::ZOOM_STEP,
                    anchor: None,
                }
            }
            (KeyCode::Char('-'), _) => {
                self.reset_count();
                ViewportEvent::Zoom {
                    delta: -Self::ZOOM_STEP,
                    anchor: None,
                }
            }
            (KeyCode::Char('='), _) => {
                self.reset_count();
                ViewportEvent::ZoomReset
            }
            (KeyCode::Char('c'), _) => {
                self.reset_count();
                ViewportEvent::CenterPage
            }
            (KeyCode::Char('r'), _) => {
                self.reset_count();
                ViewportEvent::Rotate
            }
            (KeyCode::Char('g'), KeyModifiers::NONE) => {
                self.reset_count();
                ViewportEvent::GotoStart
            }
            (KeyCode::Char('G'), KeyModifiers::SHIFT) | (KeyCode::End, _) => {
                self.reset_count();
                ViewportEvent::GotoEnd
            }
            (KeyCode::Char('q'), _) | (KeyCode::Esc, _) => {
                self.reset_count();
                ViewportEvent::Quit
            }
            _ => {
                self.reset_count();
                ViewportEvent::None
            }
        }
    }

    fn map_mouse(&mut self, mouse: MouseEvent) -> ViewportEvent {
        let anchor = Some((mouse.column, mouse.row));
        match mouse.kind {
            MouseEventKind::ScrollUp if mouse.modifiers.contains(KeyModifiers::CONTROL) => {
                ViewportEvent::Zoom {
                    delta: Self::ZOOM_STEP,
                    anchor,
                }
            }
            MouseEventKind::ScrollDown if mouse.modifiers.contains(KeyModifiers::CONTROL) => {
                ViewportEvent::Zoom {
                    delta: -Self::ZOOM_STEP,
                    anchor,
                }
            }
            MouseEventKind::ScrollUp => self.scroll(0.0, -Self::SCROLL_STEP),
            MouseEventKind::ScrollDown => self.scroll(0.0, Self::SCROLL_STEP),
            MouseEventKind::ScrollLeft => self.scroll(-Self::SCROLL_STEP, 0.0),
            MouseEventKind::ScrollRight => self.scroll(Self::SCROLL_STEP, 0.0),
            MouseEventKind::Down(button) => {
                self.reset_count();
                let button = match button {
                    MouseButton::Left => PointerButton::Left,
                    MouseButton::Middle => PointerButton::Middle,
                    MouseButton::Right => PointerButton::Right,
                };
                ViewportEvent::Click {
                    column: mouse.column,
                    row: mouse.row,
                    button,
                }
            }
            _ => ViewportEvent::None,
        }
    }

    fn scroll(&mut self, delta_x: f32, delta_y: f32) -> ViewportEvent {
        let multiplier = self.take_count() as f32;
        ViewportEvent::Scroll {
            delta_x: delta_x * multiplier,
            delta_y: delta_y * multiplier,
        }
    }

    fn push_digit(&mut self, digit: usize) {
        let current = self.pending_count.unwrap_or(0);
        let next = current.saturating_mul(10).saturating_add(digit);
        self.pending_count = Some(next);
        if let Some(c) = char::from_digit(digit as u32, 10) {
            self.pending_digits.push(c);
        }
    }

    fn take_count(&mut self) -> usize {
        let count = self
            .pending_count
            .take()
            .filter(|&count| count > 0)
            .unwrap_or(1);
        self.pending_digits.clear();
        count
    }

    fn reset_count(&mut self) {
        self.pending_count = None;
        self.pending_digits.clear();
    }

    pub fn pending_input(&self) -> Option<String> {
        if self.pending_digits.is_empty() {
            None
        } else {
            Some(self.pending_digits.clone())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossterm::event::{KeyEventKind, KeyEventState};

    #[test]
    fn kitty_draw_emits_protocol() {
        let mut renderer = KittyRenderer::new(Vec::new());
        let mut surface = Surface::new(1, 1);
        surface.fill(0xFF);

        renderer.draw(&surface, DrawParams::clamped(10, 5)).unwrap();
        let output = renderer.writer;
        assert_eq!(output[0], 0x1b);
        assert_eq!(output[1], b'_');
        assert_eq!(output[2], b'G');
    }

    fn key_event(code: KeyCode) -> Event {
        key_event_with_modifiers(code, KeyModifiers::NONE)
    }

    fn key_event_with_modifiers(code: KeyCode, modifiers: KeyModifiers) -> Event {
        Event::Key(KeyEvent {
            code,
            modifiers,
            kind: KeyEventKind::Press,
            state: KeyEventState::NONE,
        })
    }

    fn mouse_event(kind: MouseEventKind, modifiers: KeyModifiers) -> Event {
        Event::Mouse(MouseEvent {
            kind,
            column: 12,
            row: 7,
            modifiers,
        })
    }

    #[test]
    fn numeric_prefix_scales_scroll_distance() {
        let mut mapper = GestureMapper::new();
        assert_eq!(mapper.map_event(key_event(KeyCode::Char('1'))), ViewportEvent::None);
        assert_eq!(mapper.map_event(key_event(KeyCode::Char('2'))), ViewportEvent::None);
        assert_eq!(mapper.pending_input().as_deref(), Some("12"));

        match mapper.map_event(key_event(KeyCode::Char('j'))) {
            ViewportEvent::Scroll { delta_x, delta_y } => {
                assert_eq!(delta_x, 0.0);
                assert!((delta_y - 12.0 * GestureMapper::SCROLL_STEP).abs() < f32::EPSILON);
            }
            other => panic!("unexpected event: {:?}", other),
        }
        assert!(mapper.pending_input().is_none());
    }

    #[test]
    fn prefix_resets_after_use_and_on_other_commands() {
        let mut mapper = GestureMapper::new();
        assert_eq!(mapper.map_event(key_event(KeyCode::Char('3'))), ViewportEvent::None);
        assert_eq!(mapper.map_event(key_event(KeyCode::Char('c'))), ViewportEvent::CenterPage);

        match mapper.map_event(key_event(KeyCode::Char('k'))) {
            ViewportEvent::Scroll { delta_y, .. } => {
                assert!((delta_y + GestureMapper::SCROLL_STEP).abs() < f32::EPSILON);
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn plain_wheel_scrolls_and_ctrl_wheel_zooms_at_pointer() {
        let mut mapper = GestureMapper::new();

        match mapper.map_event(mouse_event(MouseEventKind::ScrollDown, KeyModifiers::NONE)) {
            ViewportEvent::Scroll { delta_y, .. } => {
                assert!((delta_y - GestureMapper::SCROLL_STEP).abs() < f32::EPSILON);
            }
            other => panic!("unexpected event: {:?}", other),
        }

        match mapper.map_event(mouse_event(
            MouseEventKind::ScrollUp,
            KeyModifiers::CONTROL,
        )) {
            ViewportEvent::Zoom { delta, anchor } => {
                assert!((delta - GestureMapper::ZOOM_STEP).abs() < f32::EPSILON);
                assert_eq!(anchor, Some((12, 7)));
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn clicks_carry_cell_position_and_button() {
        let mut mapper = GestureMapper::new();
        match mapper.map_event(mouse_event(
            MouseEventKind::Down(MouseButton::Middle),
            KeyModifiers::NONE,
        )) {
            ViewportEvent::Click {
                column,
                row,
                button,
            } => {
                assert_eq!((column, row), (12, 7));
                assert_eq!(button, PointerButton::Middle);
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn equal_resets_zoom_and_q_quits() {
        let mut mapper = GestureMapper::new();
        assert_eq!(mapper.map_event(key_event(KeyCode::Char('='))), ViewportEvent::ZoomReset);
        assert_eq!(mapper.map_event(key_event(KeyCode::Char('q'))), ViewportEvent::Quit);
    }

    #[test]
    fn goto_keys_map_to_document_ends() {
        let mut mapper = GestureMapper::new();
        assert_eq!(mapper.map_event(key_event(KeyCode::Char('g'))), ViewportEvent::GotoStart);
        assert_eq!(
            mapper.map_event(key_event_with_modifiers(
                KeyCode::Char('G'),
                KeyModifiers::SHIFT
            )),
            ViewportEvent::GotoEnd
        );
    }
}
