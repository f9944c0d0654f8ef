//! Development preview of the cube.
//!
//! The simulator keeps a 3D model of every LED and draws it through a
//! [`Viewport`]. All view state (camera, model, output) lives in one
//! [`SimulatorContext`] owned by the cube.

use std::io::{self, Write};

use log::{debug, info};

use super::{Cube, CubeError};
use crate::animation::{Frame, Shape};
use crate::compute::{RemapError, to_unit_rgb, unpack};

/// One simulated LED.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Led {
    /// Position in cube space (one unit between neighbours).
    pub position: [f32; 3],
    /// Color as normalized RGB.
    pub color: [f32; 3],
    /// Packed color the LED was last set to.
    pub packed: u32,
}

/// 3D model of the cube's LEDs, stored in frame (`[x][y][z]`) order.
#[derive(Debug, Clone)]
pub struct LedModel {
    shape: Shape,
    leds: Vec<Led>,
}

impl LedModel {
    /// Model with every LED off.
    pub fn new(shape: Shape) -> Self {
        let (width, height, depth) = shape;
        let mut leds = Vec::with_capacity(width * height * depth);
        for x in 0..width {
            for y in 0..height {
                for z in 0..depth {
                    leds.push(Led {
                        position: [x as f32, y as f32, z as f32],
                        color: [0.0; 3],
                        packed: 0,
                    });
                }
            }
        }
        Self { shape, leds }
    }

    /// Model shape.
    pub fn shape(&self) -> Shape {
        self.shape
    }

    /// All LEDs.
    pub fn leds(&self) -> &[Led] {
        &self.leds
    }

    /// Geometric center of the model.
    pub fn center(&self) -> [f32; 3] {
        let (w, h, d) = self.shape;
        [
            (w as f32 - 1.0) / 2.0,
            (h as f32 - 1.0) / 2.0,
            (d as f32 - 1.0) / 2.0,
        ]
    }

    /// Copy a frame's colors onto the model.
    pub fn set_colors(&mut self, frame: &Frame) -> Result<(), RemapError> {
        if frame.shape() != self.shape {
            return Err(RemapError::ShapeMismatch {
                frame: frame.shape(),
                cube: self.shape,
            });
        }
        for (led, &packed) in self.leds.iter_mut().zip(frame.cells()) {
            led.packed = packed;
            led.color = to_unit_rgb(packed);
        }
        Ok(())
    }
}

/// Orbit camera looking at the center of the cube.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Camera {
    /// Rotation around the vertical axis, in degrees.
    pub yaw: f32,
    /// Elevation, in degrees. Clamped to (-89, 89).
    pub pitch: f32,
    /// Distance from the cube center.
    pub distance: f32,
    /// Vertical field of view, in degrees.
    pub fov_y: f32,
}

impl Camera {
    /// Camera framing a cube of the given shape.
    pub fn framing(shape: Shape) -> Self {
        let (w, h, d) = shape;
        let extent = w.max(h).max(d) as f32;
        Self {
            yaw: 30.0,
            pitch: 20.0,
            distance: extent * 2.5,
            fov_y: 45.0,
        }
    }

    /// Rotate around the cube.
    pub fn orbit(&mut self, yaw: f32, pitch: f32) {
        self.yaw = (self.yaw + yaw).rem_euclid(360.0);
        self.pitch = (self.pitch + pitch).clamp(-89.0, 89.0);
    }
}

/// Project `point` (relative to the look-at target) to normalized screen
/// coordinates in `[-1, 1]`, with `y` pointing up.
///
/// Returns `(sx, sy, depth)`, or `None` if the point is behind the camera.
pub fn project(camera: &Camera, point: [f32; 3]) -> Option<(f32, f32, f32)> {
    let (sin_yaw, cos_yaw) = camera.yaw.to_radians().sin_cos();
    let (sin_pitch, cos_pitch) = camera.pitch.to_radians().sin_cos();
    let [x, y, z] = point;

    // Yaw around Y, then pitch around X.
    let x1 = x * cos_yaw - z * sin_yaw;
    let z1 = x * sin_yaw + z * cos_yaw;
    let y2 = y * cos_pitch - z1 * sin_pitch;
    let z2 = y * sin_pitch + z1 * cos_pitch;

    let depth = camera.distance + z2;
    if depth <= 1e-3 {
        return None;
    }
    let focal = 1.0 / (camera.fov_y.to_radians() / 2.0).tan();
    Some((focal * x1 / depth, focal * y2 / depth, depth))
}

/// Viewport errors.
#[derive(Debug, thiserror::Error)]
pub enum ViewportError {
    #[error("Viewer closed")]
    Closed,
    #[error("Viewport I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Display surface for the simulator.
pub trait Viewport {
    /// Draw the model as seen through `camera`.
    fn draw(&mut self, model: &LedModel, camera: &Camera) -> Result<(), ViewportError>;

    /// Release the display.
    fn close(&mut self) -> Result<(), ViewportError> {
        Ok(())
    }
}

/// Everything the simulator needs to draw, owned in one place.
pub struct SimulatorContext {
    /// LED model updated by every frame.
    pub model: LedModel,
    /// Current view.
    pub camera: Camera,
    viewport: Box<dyn Viewport>,
}

impl SimulatorContext {
    /// Context for a cube of `shape` drawing through `viewport`.
    pub fn new(shape: Shape, viewport: Box<dyn Viewport>) -> Self {
        Self {
            model: LedModel::new(shape),
            camera: Camera::framing(shape),
            viewport,
        }
    }

    /// Draw the current model.
    pub fn draw(&mut self) -> Result<(), ViewportError> {
        self.viewport.draw(&self.model, &self.camera)
    }
}

/// Cube back end rendering the LED model to a viewport.
pub struct SimulatorCube {
    context: SimulatorContext,
}

impl SimulatorCube {
    /// Simulator using the given viewport.
    pub fn new(shape: Shape, viewport: Box<dyn Viewport>) -> Self {
        info!("Simulated cube {}x{}x{}", shape.0, shape.1, shape.2);
        Self {
            context: SimulatorContext::new(shape, viewport),
        }
    }

    /// Simulator drawing to standard output.
    pub fn terminal(shape: Shape) -> Self {
        Self::new(shape, Box::new(TerminalViewport::stdout()))
    }

    /// Shared view state.
    pub fn context(&self) -> &SimulatorContext {
        &self.context
    }

    /// Rotate the camera around the cube.
    pub fn orbit(&mut self, yaw: f32, pitch: f32) {
        self.context.camera.orbit(yaw, pitch);
    }
}

impl Cube for SimulatorCube {
    fn set_leds(&mut self, frame: &Frame) -> Result<(), CubeError> {
        self.context.model.set_colors(frame)?;
        Ok(())
    }

    fn render(&mut self) -> Result<(), CubeError> {
        Ok(self.context.draw()?)
    }

    fn finish(mut self: Box<Self>) {
        if let Err(e) = self.context.viewport.close() {
            debug!("Viewport close failed: {e}");
        }
        info!("Simulator closed");
    }

    fn is_recoverable(&self, error: &CubeError) -> bool {
        !matches!(error, CubeError::ShutdownRequested)
    }
}

/// Viewport drawing the cube as true-color text.
///
/// Each LED becomes one cell of a character grid; nearer LEDs hide farther
/// ones. Every draw rewrites the whole screen from the top-left corner. A
/// writer that has gone away (broken pipe) means the viewer closed.
pub struct TerminalViewport<W: Write> {
    writer: W,
    columns: usize,
    rows: usize,
    /// Pre-allocated depth buffer, one entry per character cell.
    depth: Vec<f32>,
    /// Pre-allocated color buffer; `None` for empty cells.
    cells: Vec<Option<u32>>,
    /// Pre-allocated output buffer.
    out: Vec<u8>,
}

impl TerminalViewport<io::Stdout> {
    /// Viewport on standard output with a default 64x32 grid.
    pub fn stdout() -> Self {
        Self::new(io::stdout(), 64, 32)
    }
}

impl<W: Write> TerminalViewport<W> {
    /// Terminal cells are roughly twice as tall as they are wide.
    const CELL_ASPECT: f32 = 2.0;

    /// Viewport writing a `columns` x `rows` grid to `writer`.
    pub fn new(writer: W, columns: usize, rows: usize) -> Self {
        let columns = columns.max(1);
        let rows = rows.max(1);
        Self {
            writer,
            columns,
            rows,
            depth: vec![f32::INFINITY; columns * rows],
            cells: vec![None; columns * rows],
            out: Vec::new(),
        }
    }

    /// Output written so far.
    pub fn writer(&self) -> &W {
        &self.writer
    }

    /// Rasterize the model into `cells`.
    fn rasterize(&mut self, model: &LedModel, camera: &Camera) {
        self.depth.fill(f32::INFINITY);
        self.cells.fill(None);

        let center = model.center();
        let half_cols = self.columns as f32 / 2.0;
        let half_rows = self.rows as f32 / 2.0;
        // Fit the vertical extent to the grid, keeping cells square on screen.
        let scale_y = half_rows;
        let scale_x = (half_rows * Self::CELL_ASPECT).min(half_cols);

        for led in model.leds() {
            let relative = [
                led.position[0] - center[0],
                led.position[1] - center[1],
                led.position[2] - center[2],
            ];
            let Some((sx, sy, depth)) = project(camera, relative) else {
                continue;
            };
            let column = (half_cols + sx * scale_x).floor();
            let row = (half_rows - sy * scale_y).floor();
            if column < 0.0 || row < 0.0 {
                continue;
            }
            let (column, row) = (column as usize, row as usize);
            if column >= self.columns || row >= self.rows {
                continue;
            }
            let slot = row * self.columns + column;
            if depth < self.depth[slot] {
                self.depth[slot] = depth;
                self.cells[slot] = Some(led.packed);
            }
        }
    }

    /// Encode `cells` as ANSI text into `out`.
    fn encode(&mut self) {
        self.out.clear();
        self.out.extend_from_slice(b"\x1b[H");
        for row in self.cells.chunks(self.columns) {
            for cell in row {
                match cell {
                    Some(0) => self.out.extend_from_slice("\x1b[38;2;60;60;60m·".as_bytes()),
                    Some(color) => {
                        let (r, g, b) = unpack(*color);
                        self.out
                            .extend_from_slice(format!("\x1b[38;2;{r};{g};{b}m●").as_bytes());
                    }
                    None => self.out.push(b' '),
                }
            }
            self.out.extend_from_slice(b"\x1b[0m\n");
        }
    }
}

impl<W: Write> Viewport for TerminalViewport<W> {
    fn draw(&mut self, model: &LedModel, camera: &Camera) -> Result<(), ViewportError> {
        self.rasterize(model, camera);
        self.encode();
        let written = self
            .writer
            .write_all(&self.out)
            .and_then(|()| self.writer.flush());
        match written {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::BrokenPipe => Err(ViewportError::Closed),
            Err(e) => Err(ViewportError::Io(e)),
        }
    }

    fn close(&mut self) -> Result<(), ViewportError> {
        self.writer.write_all(b"\x1b[0m")?;
        self.writer.flush()?;
        Ok(())
    }
}
