//! LED cube driver - Stream JSON animations onto a 3D LED cube.
//!
//! Animations are JSON arrays of frames, each frame a `[x][y][z]` volume of
//! packed `0xRRGGBB` colors. Frames are decoded on a background thread,
//! handed over a bounded queue and replayed in a loop once the file ends.
//! A fixed-rate render loop pushes one frame per tick to a [`cube::Cube`]:
//! either the physical strips or a terminal simulator.
//!
//! # Architecture
//!
//! - `animation`: Frames, the streaming frame source and the file writer
//! - `compute`: Coordinate remapping onto strip channels, color helpers
//! - `cube`: Output back ends (hardware strips, simulator)
//! - `playback`: The fixed-rate render loop
//! - `schema`: Cube configuration and procedural animation patterns
//!
//! # Example
//!
//! ```rust,no_run
//! use std::fs::File;
//! use std::io::BufReader;
//!
//! use led_cube::{
//!     animation::JsonFrameSource,
//!     cube::SimulatorCube,
//!     playback::RenderLoop,
//!     schema::CubeConfig,
//! };
//!
//! let config = CubeConfig::default();
//! let file = BufReader::new(File::open("animation.json").unwrap());
//! let (source, errors) = JsonFrameSource::open("animation.json", file);
//!
//! let cube = Box::new(SimulatorCube::terminal(config.geometry().shape()));
//! let exit = RenderLoop::new(source.unwrap(), errors, config.frame_rate)
//!     .with_tick_limit(100)
//!     .run(cube);
//! println!("{exit:?}");
//! ```

pub mod animation;
pub mod compute;
pub mod cube;
pub mod playback;
pub mod schema;
