//! X11 MIT-SHM frame grabber
//!
//! Monitors come from RandR, windows from the window manager's
//! `_NET_CLIENT_LIST_STACKING`. Grabs use `ShmGetImage` in Z-pixmap format
//! into a System V shared memory segment, so the server writes pixels
//! straight into our address space.
//!
//! A monitor source subscribes to RandR screen changes while attached, so a
//! mode switch is reported by [`FrameGrabber::source_changed`].

use std::ffi::c_void;
use tracing::{debug, info, warn};
use x11rb::connection::Connection;
use x11rb::protocol::randr::{self, ConnectionExt as _};
use x11rb::protocol::shm::{self, ConnectionExt as _};
use x11rb::protocol::xproto::{AtomEnum, ConnectionExt as _, ImageFormat, MapState, Window};
use x11rb::protocol::Event;
use x11rb::rust_connection::RustConnection;

use super::software::{FrameGrabber, GrabFormat};
use crate::error::{CaptureError, Result};
use crate::formats;
use crate::types::{CaptureSource, Geometry, SourceHandle, SourceKind};

/// Bytes per pixel of a 24/32-bit Z-pixmap
const BYTES_PER_PIXEL: usize = 4;

/// Open display connection
struct Display {
    conn: RustConnection,
    root: Window,
    depth: u8,
    screen_size: (u16, u16),
}

impl Display {
    fn connect() -> Result<Self> {
        let (conn, screen_num) = x11rb::connect(None)?;
        let screen = conn
            .setup()
            .roots
            .get(screen_num)
            .ok_or_else(|| CaptureError::resource(format!("X11 screen {} not found", screen_num)))?;
        let root = screen.root;
        let depth = screen.root_depth;
        let screen_size = (screen.width_in_pixels, screen.height_in_pixels);

        let version = conn
            .shm_query_version()
            .map_err(|e| CaptureError::resource(format!("MIT-SHM query failed: {}", e)))?
            .reply()
            .map_err(|e| CaptureError::resource(format!("MIT-SHM not supported: {}", e)))?;

        info!(
            "Connected to X11 display (screen {}, depth {}, MIT-SHM {}.{})",
            screen_num, depth, version.major_version, version.minor_version
        );

        Ok(Self {
            conn,
            root,
            depth,
            screen_size,
        })
    }

    fn atom(&self, name: &[u8]) -> Result<u32> {
        Ok(self.conn.intern_atom(false, name)?.reply()?.atom)
    }

    fn monitors(&self) -> Vec<CaptureSource> {
        let reply = self
            .conn
            .randr_get_monitors(self.root, true)
            .ok()
            .and_then(|cookie| cookie.reply().ok());

        let Some(reply) = reply else {
            debug!("RandR unavailable, using the whole screen");
            let (width, height) = self.screen_size;
            return vec![CaptureSource::monitor(
                "Screen",
                SourceHandle::new(self.root as u64),
                Geometry::new(0, 0, width as u32, height as u32),
            )];
        };

        reply
            .monitors
            .iter()
            .enumerate()
            .map(|(i, monitor)| {
                let name = self
                    .conn
                    .get_atom_name(monitor.name)
                    .ok()
                    .and_then(|cookie| cookie.reply().ok())
                    .map(|reply| String::from_utf8_lossy(&reply.name).into_owned())
                    .filter(|name| !name.is_empty())
                    .unwrap_or_else(|| format!("Monitor-{}", i));
                CaptureSource::monitor(
                    name,
                    SourceHandle::new(self.root as u64),
                    Geometry::new(
                        monitor.x as i32,
                        monitor.y as i32,
                        monitor.width as u32,
                        monitor.height as u32,
                    ),
                )
            })
            .collect()
    }

    /// Current geometry of the monitor called `name`
    fn monitor_geometry(&self, name: &str) -> Option<Geometry> {
        self.monitors()
            .into_iter()
            .find(|monitor| monitor.name == name)
            .map(|monitor| monitor.geometry)
    }

    /// Ask for RandR screen and CRTC change events on the root window
    fn watch_screen_changes(&self) {
        let mask = randr::NotifyMask::SCREEN_CHANGE | randr::NotifyMask::CRTC_CHANGE;
        let selected = self
            .conn
            .randr_select_input(self.root, mask)
            .map_err(CaptureError::from)
            .and_then(|cookie| cookie.check().map_err(CaptureError::from));
        if let Err(e) = selected {
            debug!("RandR change events unavailable: {}", e);
        }
    }

    /// Drain queued events, reporting whether any was a RandR change
    fn screen_changed(&self) -> Result<bool> {
        let mut changed = false;
        while let Some(event) = self.conn.poll_for_event()? {
            if matches!(event, Event::RandrScreenChangeNotify(_) | Event::RandrNotify(_)) {
                changed = true;
            }
        }
        Ok(changed)
    }

    fn window_name(&self, window: Window, net_wm_name: u32, utf8: u32) -> Option<String> {
        let read = |property: u32, kind: u32| {
            self.conn
                .get_property(false, window, property, kind, 0, 1024)
                .ok()?
                .reply()
                .ok()
                .map(|reply| String::from_utf8_lossy(&reply.value).trim().to_string())
                .filter(|name| !name.is_empty())
        };
        read(net_wm_name, utf8).or_else(|| read(AtomEnum::WM_NAME.into(), AtomEnum::STRING.into()))
    }

    fn window_geometry(&self, window: Window) -> Option<Geometry> {
        let geometry = self.conn.get_geometry(window).ok()?.reply().ok()?;
        let origin = self
            .conn
            .translate_coordinates(window, self.root, 0, 0)
            .ok()?
            .reply()
            .ok()?;
        Some(Geometry::new(
            origin.dst_x as i32,
            origin.dst_y as i32,
            geometry.width as u32,
            geometry.height as u32,
        ))
    }

    fn windows(&self) -> Result<Vec<CaptureSource>> {
        let stacking = self.atom(b"_NET_CLIENT_LIST_STACKING")?;
        let net_wm_name = self.atom(b"_NET_WM_NAME")?;
        let utf8 = self.atom(b"UTF8_STRING")?;

        let reply = self
            .conn
            .get_property(false, self.root, stacking, AtomEnum::WINDOW, 0, u32::MAX)?
            .reply()?;
        let Some(clients) = reply.value32() else {
            debug!("Window manager does not publish _NET_CLIENT_LIST_STACKING");
            return Ok(Vec::new());
        };

        let mut windows = Vec::new();
        for window in clients {
            // Windows can vanish between the list and these queries
            let Some(attrs) = self
                .conn
                .get_window_attributes(window)
                .ok()
                .and_then(|cookie| cookie.reply().ok())
            else {
                continue;
            };
            if attrs.map_state != MapState::VIEWABLE || attrs.override_redirect {
                continue;
            }
            let Some(name) = self.window_name(window, net_wm_name, utf8) else {
                continue;
            };
            let Some(geometry) = self.window_geometry(window) else {
                continue;
            };
            windows.push(CaptureSource::window(name, SourceHandle::new(window as u64), geometry));
        }
        Ok(windows)
    }
}

/// System V shared memory segment attached to the X server
struct ShmSegment {
    seg: shm::Seg,
    addr: *mut c_void,
    size: usize,
}

// SAFETY: the mapping is owned exclusively by this struct and only read
// through `&self` after the X server has finished writing a grab.
unsafe impl Send for ShmSegment {}

impl ShmSegment {
    fn create(conn: &RustConnection, size: usize) -> Result<Self> {
        // SAFETY: plain SysV calls; every failure path below releases what
        // was created before it.
        let shmid = unsafe { libc::shmget(libc::IPC_PRIVATE, size, libc::IPC_CREAT | 0o600) };
        if shmid < 0 {
            return Err(CaptureError::resource(format!(
                "shmget of {} bytes failed: {}",
                size,
                std::io::Error::last_os_error()
            )));
        }

        let addr = unsafe { libc::shmat(shmid, std::ptr::null(), 0) };
        if addr as isize == -1 {
            let err = std::io::Error::last_os_error();
            unsafe { libc::shmctl(shmid, libc::IPC_RMID, std::ptr::null_mut()) };
            return Err(CaptureError::resource(format!("shmat failed: {}", err)));
        }

        let attached = conn
            .generate_id()
            .map_err(|e| CaptureError::resource(format!("Failed to allocate SHM segment id: {}", e)))
            .and_then(|seg| {
                conn.shm_attach(seg, shmid as u32, false)
                    .map_err(|e| CaptureError::resource(format!("ShmAttach failed: {}", e)))?
                    .check()
                    .map_err(|e| CaptureError::resource(format!("ShmAttach failed: {}", e)))?;
                Ok(seg)
            });

        // Both sides are attached (or failed); the segment goes away with the
        // last detach
        unsafe { libc::shmctl(shmid, libc::IPC_RMID, std::ptr::null_mut()) };

        match attached {
            Ok(seg) => Ok(Self { seg, addr, size }),
            Err(e) => {
                unsafe { libc::shmdt(addr) };
                Err(e)
            }
        }
    }

    fn as_slice(&self) -> &[u8] {
        // SAFETY: addr points to a live mapping of `size` bytes until Drop
        unsafe { std::slice::from_raw_parts(self.addr as *const u8, self.size) }
    }

    fn release(self, conn: &RustConnection) -> Result<()> {
        let result = conn
            .shm_detach(self.seg)
            .map_err(CaptureError::from)
            .and_then(|cookie| cookie.check().map_err(CaptureError::from));
        drop(self);
        result
    }
}

impl Drop for ShmSegment {
    fn drop(&mut self) {
        // SAFETY: addr came from a successful shmat and is detached once
        if unsafe { libc::shmdt(self.addr) } != 0 {
            warn!("shmdt failed: {}", std::io::Error::last_os_error());
        }
    }
}

/// Area being grabbed
#[derive(Debug, Clone, Copy)]
struct GrabRegion {
    drawable: Window,
    x: i16,
    y: i16,
    width: u16,
    height: u16,
    window: bool,
}

impl GrabRegion {
    /// Whether a monitor now at `current` differs from this region
    ///
    /// `None` means the monitor is gone.
    fn moved_to(&self, current: Option<Geometry>) -> bool {
        match current {
            Some(geometry) => {
                geometry.x != self.x as i32
                    || geometry.y != self.y as i32
                    || geometry.width != self.width as u32
                    || geometry.height != self.height as u32
            }
            None => true,
        }
    }
}

/// X11 shared-memory grabber
#[derive(Default)]
pub struct X11Grabber {
    display: Option<Display>,
    segment: Option<ShmSegment>,
    region: Option<GrabRegion>,
    /// Name of the attached monitor
    monitor: Option<String>,
}

impl X11Grabber {
    /// Create a grabber; the display is opened on first use
    pub fn new() -> Self {
        Self::default()
    }

    fn display(&mut self) -> Result<&Display> {
        if self.display.is_none() {
            self.display = Some(Display::connect()?);
        }
        self.display
            .as_ref()
            .ok_or_else(|| CaptureError::resource("X11 display not connected"))
    }
}

impl FrameGrabber for X11Grabber {
    fn name(&self) -> &str {
        "x11-shm"
    }

    fn enumerate(&mut self) -> Result<Vec<CaptureSource>> {
        let display = self.display()?;
        let mut sources = display.monitors();
        match display.windows() {
            Ok(windows) => sources.extend(windows),
            Err(e) => warn!("Window enumeration failed: {}", e),
        }
        Ok(sources)
    }

    fn attach(&mut self, source: &CaptureSource) -> Result<GrabFormat> {
        if self.segment.is_some() {
            self.detach()?;
        }

        let display = self.display()?;
        let format = formats::from_x11_depth(display.depth).ok_or_else(|| {
            CaptureError::Unsupported(format!("X11 depth {} is not supported", display.depth))
        })?;

        let region = match source.kind {
            SourceKind::Monitor => {
                let geometry = display.monitor_geometry(&source.name).unwrap_or(source.geometry);
                if geometry != source.geometry {
                    debug!("Monitor {} changed to {}", source.name, geometry);
                }
                display.watch_screen_changes();
                GrabRegion {
                    drawable: display.root,
                    x: geometry.x as i16,
                    y: geometry.y as i16,
                    width: geometry.width as u16,
                    height: geometry.height as u16,
                    window: false,
                }
            }
            SourceKind::Window => {
                let window = source.handle.as_u64() as Window;
                let geometry = display.window_geometry(window).ok_or_else(|| {
                    CaptureError::resource(format!("Window {} is no longer available", source.name))
                })?;
                if geometry != source.geometry {
                    debug!("Window {} moved or resized to {}", source.name, geometry);
                }
                GrabRegion {
                    drawable: window,
                    x: 0,
                    y: 0,
                    width: geometry.width as u16,
                    height: geometry.height as u16,
                    window: true,
                }
            }
        };

        let size = region.width as usize * region.height as usize * BYTES_PER_PIXEL;
        let segment = ShmSegment::create(&display.conn, size)?;
        debug!(
            "Attached {} byte SHM segment for {} ({}x{})",
            size, source.name, region.width, region.height
        );

        self.segment = Some(segment);
        self.region = Some(region);
        self.monitor = (!region.window).then(|| source.name.clone());
        Ok(GrabFormat {
            format,
            width: region.width as u32,
            height: region.height as u32,
        })
    }

    fn grab(&mut self) -> Result<()> {
        let (Some(display), Some(segment), Some(region)) =
            (self.display.as_ref(), self.segment.as_ref(), self.region)
        else {
            return Err(CaptureError::invalid_state("X11 grabber is not attached"));
        };

        display
            .conn
            .shm_get_image(
                region.drawable,
                region.x,
                region.y,
                region.width,
                region.height,
                !0,
                ImageFormat::Z_PIXMAP.into(),
                segment.seg,
                0,
            )?
            .reply()?;
        Ok(())
    }

    fn frame(&self) -> &[u8] {
        self.segment.as_ref().map(ShmSegment::as_slice).unwrap_or(&[])
    }

    fn source_changed(&mut self) -> Result<bool> {
        let (Some(display), Some(region)) = (self.display.as_ref(), self.region) else {
            return Ok(false);
        };
        if region.window {
            let geometry = display.conn.get_geometry(region.drawable)?.reply()?;
            return Ok(geometry.width != region.width || geometry.height != region.height);
        }

        if !display.screen_changed()? {
            return Ok(false);
        }
        let name = self.monitor.as_deref().unwrap_or_default();
        let current = display.monitor_geometry(name);
        let changed = region.moved_to(current);
        if changed {
            match current {
                Some(geometry) => info!("Monitor {} changed to {}", name, geometry),
                None => warn!("Monitor {} disappeared", name),
            }
        }
        Ok(changed)
    }

    fn detach(&mut self) -> Result<()> {
        self.region = None;
        self.monitor = None;
        match (self.segment.take(), self.display.as_ref()) {
            (Some(segment), Some(display)) => segment.release(&display.conn),
            _ => Ok(()),
        }
    }

    fn disconnect(&mut self) {
        if let Err(e) = self.detach() {
            warn!("Failed to detach SHM segment: {}", e);
        }
        if self.display.take().is_some() {
            debug!("Disconnected from X11 display");
        }
    }
}

impl Drop for X11Grabber {
    fn drop(&mut self) {
        self.disconnect();
    }
}
