use std::io::{Read, Write};
use std::os::unix::io::AsFd;
use std::os::unix::net::UnixStream;
use std::thread;
use std::time::{Duration, Instant};

use wayland_client::globals::{registry_queue_init, GlobalListContents};
use wayland_client::protocol::{
    wl_buffer, wl_compositor, wl_registry, wl_shm, wl_shm_pool, wl_surface,
};
use wayland_client::{delegate_noop, Connection, Dispatch, QueueHandle};
use wayland_protocols::xdg::shell::client::{xdg_surface, xdg_toplevel, xdg_wm_base};
use wayland_server::Display;

use super::*;
use crate::compositor::{CompositorState, OutputMode, SceneConfig};
use crate::wire::{FrameDecoder, MessageBuilder, MessageHeader};

const TEST_KEYMAP: &str = "xkb_keymap { };";

struct Harness {
    display: Display<ServerState>,
    state: ServerState,
    scene: SharedScene,
}

impl Harness {
    fn new() -> Self {
        let mut scene = CompositorState::new(SceneConfig::default());
        scene.add_output("HOST-1".to_string(), OutputMode::new(1280, 800, 60000), 1.0);
        let scene = scene.into_shared();
        let display = Display::<ServerState>::new().unwrap();
        let state = ServerState::new(
            scene.clone(),
            display.handle(),
            SeatResources::new().into_shared(),
            TEST_KEYMAP.to_string(),
            None,
        );
        Self {
            display,
            state,
            scene,
        }
    }

    fn connect(&mut self) -> UnixStream {
        let (server, client) = UnixStream::pair().unwrap();
        self.state.accept(server);
        client
    }

    fn dispatch(&mut self) {
        self.display.dispatch_clients(&mut self.state).unwrap();
        self.state.after_dispatch();
    }

    /// Dispatch until `done` holds or the deadline passes
    fn pump_until(&mut self, mut done: impl FnMut(&mut Self) -> bool) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !done(self) {
            assert!(Instant::now() < deadline, "server condition never held");
            self.dispatch();
            thread::sleep(Duration::from_millis(2));
        }
    }

    /// Run a blocking client on its own thread while the server dispatches
    fn run_client<T: Send + 'static>(
        &mut self,
        client: impl FnOnce(UnixStream) -> T + Send + 'static,
    ) -> T {
        let stream = self.connect();
        let handle = thread::spawn(move || client(stream));
        self.pump_until(|_| handle.is_finished());
        self.dispatch();
        handle.join().unwrap()
    }

    fn connection_count(&self) -> usize {
        lock_scene(&self.scene).connections.len()
    }
}

/// Read frames from a raw client until one for `object`/`opcode` shows up
fn read_until(stream: &mut UnixStream, object: u32, opcode: u16) -> Vec<MessageHeader> {
    stream
        .set_read_timeout(Some(Duration::from_secs(5)))
        .unwrap();
    let mut decoder = FrameDecoder::new();
    let mut seen = Vec::new();
    let mut buf = [0u8; 4096];
    loop {
        while let Some(frame) = decoder.next_frame().unwrap() {
            let header = MessageHeader::parse(&frame).unwrap().unwrap();
            seen.push(header);
            if header.object_id == object && header.opcode == opcode {
                return seen;
            }
        }
        let n = stream.read(&mut buf).unwrap();
        assert!(n > 0, "server closed the connection");
        decoder.push(&buf[..n]);
    }
}

#[test]
fn test_malformed_frame_only_disconnects_sender() {
    let mut harness = Harness::new();
    let mut good = harness.connect();
    let mut bad = harness.connect();
    harness.dispatch();
    assert_eq!(harness.connection_count(), 2);

    let mut bogus = MessageHeader {
        object_id: 1,
        opcode: 0,
        size: 8,
    }
    .to_bytes();
    // rewrite the size field to 4 bytes, shorter than the header itself
    bogus[4..].copy_from_slice(&(4u32 << 16).to_ne_bytes());
    bad.write_all(&bogus).unwrap();

    harness.pump_until(|h| h.connection_count() == 1);

    // wl_display.get_registry(new_id 2), then wl_display.sync(new_id 3)
    good.write_all(&MessageBuilder::new(1, 1).uint(2).build())
        .unwrap();
    good.write_all(&MessageBuilder::new(1, 0).uint(3).build())
        .unwrap();
    harness.dispatch();

    let seen = read_until(&mut good, 3, 0);
    let globals = seen
        .iter()
        .filter(|h| h.object_id == 2 && h.opcode == 0)
        .count();
    assert_eq!(globals, 5);
}

#[test]
fn test_unknown_object_only_disconnects_sender() {
    let mut harness = Harness::new();
    let mut good = harness.connect();
    let mut bad = harness.connect();
    harness.dispatch();
    assert_eq!(harness.connection_count(), 2);

    bad.write_all(&MessageBuilder::new(999, 0).build()).unwrap();
    harness.pump_until(|h| h.connection_count() == 1);

    // wl_display.error arrives before the socket closes
    let seen = read_until(&mut bad, 1, 0);
    assert_eq!(seen.last().map(|h| (h.object_id, h.opcode)), Some((1, 0)));

    // wl_display.sync(new_id 2)
    good.write_all(&MessageBuilder::new(1, 0).uint(2).build())
        .unwrap();
    harness.dispatch();
    read_until(&mut good, 2, 0);
    assert_eq!(harness.connection_count(), 1);
}

#[test]
fn test_disconnect_releases_windows() {
    let mut harness = Harness::new();
    harness.run_client(|stream| {
        let conn = Connection::from_socket(stream).unwrap();
        let (globals, mut queue) = registry_queue_init::<TestClient>(&conn).unwrap();
        let qh = queue.handle();
        let compositor: wl_compositor::WlCompositor = globals.bind(&qh, 4..=6, ()).unwrap();
        let wm_base: xdg_wm_base::XdgWmBase = globals.bind(&qh, 1..=6, ()).unwrap();
        let surface = compositor.create_surface(&qh, ());
        let xdg_surface = wm_base.get_xdg_surface(&surface, &qh, ());
        let _toplevel = xdg_surface.get_toplevel(&qh, ());
        surface.commit();
        let mut client = TestClient::default();
        queue.roundtrip(&mut client).unwrap();
        assert!(client.configure_serial.is_some());
    });

    // the client thread dropped its connection on exit
    harness.pump_until(|h| h.connection_count() == 0);
    let scene = lock_scene(&harness.scene);
    assert!(scene.windows.is_empty());
    assert!(scene.surfaces.is_empty());
}

#[test]
fn test_toplevel_maps_with_copied_pixels() {
    let mut harness = Harness::new();
    let (client, _conn) = harness.run_client(|stream| {
        let conn = Connection::from_socket(stream).unwrap();
        let (globals, mut queue) = registry_queue_init::<TestClient>(&conn).unwrap();
        let qh = queue.handle();
        let compositor: wl_compositor::WlCompositor = globals.bind(&qh, 4..=6, ()).unwrap();
        let shm: wl_shm::WlShm = globals.bind(&qh, 1..=1, ()).unwrap();
        let wm_base: xdg_wm_base::XdgWmBase = globals.bind(&qh, 1..=6, ()).unwrap();

        let surface = compositor.create_surface(&qh, ());
        let xdg_surface = wm_base.get_xdg_surface(&surface, &qh, ());
        let toplevel = xdg_surface.get_toplevel(&qh, ());
        toplevel.set_title("pixels".to_string());
        surface.commit();

        let mut client = TestClient::default();
        queue.roundtrip(&mut client).unwrap();
        let serial = client.configure_serial.expect("initial configure");
        xdg_surface.ack_configure(serial);

        let mut file = tempfile::tempfile().unwrap();
        let pixels: Vec<u8> = std::iter::repeat(0xff00ff00u32.to_le_bytes())
            .take(16)
            .flatten()
            .collect();
        file.write_all(&pixels).unwrap();
        let pool = shm.create_pool(file.as_fd(), 64, &qh, ());
        let buffer = pool.create_buffer(0, 4, 4, 16, wl_shm::Format::Argb8888, &qh, ());
        surface.attach(Some(&buffer), 0, 0);
        surface.damage_buffer(0, 0, 4, 4);
        surface.commit();
        queue.roundtrip(&mut client).unwrap();
        // the connection stays open so the window outlives the thread
        (client, conn)
    });

    assert!(client.released);
    assert_eq!(client.toplevel_configures, 1);

    let scene = lock_scene(&harness.scene);
    let (_, window) = scene.windows.iter().next().expect("window");
    assert!(window.mapped);
    assert_eq!(window.title.as_deref(), Some("pixels"));
    let surface = scene.surfaces.get(window.surface_id).unwrap();
    let buffer = surface.current.buffer.as_ref().unwrap();
    assert_eq!((buffer.width, buffer.height), (4, 4));
    assert_eq!(buffer.pixel(3, 3), 0xff00ff00);
}

#[test]
fn test_buffer_before_configure_is_a_protocol_error() {
    let mut harness = Harness::new();
    let failed = harness.run_client(|stream| {
        let conn = Connection::from_socket(stream).unwrap();
        let (globals, mut queue) = registry_queue_init::<TestClient>(&conn).unwrap();
        let qh = queue.handle();
        let compositor: wl_compositor::WlCompositor = globals.bind(&qh, 4..=6, ()).unwrap();
        let shm: wl_shm::WlShm = globals.bind(&qh, 1..=1, ()).unwrap();
        let wm_base: xdg_wm_base::XdgWmBase = globals.bind(&qh, 1..=6, ()).unwrap();

        let surface = compositor.create_surface(&qh, ());
        let xdg_surface = wm_base.get_xdg_surface(&surface, &qh, ());
        let _toplevel = xdg_surface.get_toplevel(&qh, ());

        let file = tempfile::tempfile().unwrap();
        file.set_len(64).unwrap();
        let pool = shm.create_pool(file.as_fd(), 64, &qh, ());
        let buffer = pool.create_buffer(0, 4, 4, 16, wl_shm::Format::Argb8888, &qh, ());
        surface.attach(Some(&buffer), 0, 0);
        surface.commit();

        let mut client = TestClient::default();
        queue.roundtrip(&mut client).is_err()
    });

    assert!(failed);
    harness.pump_until(|h| h.connection_count() == 0);
}

#[test]
fn test_unreadable_buffer_is_a_protocol_error() {
    let mut harness = Harness::new();
    let failed = harness.run_client(|stream| {
        let conn = Connection::from_socket(stream).unwrap();
        let (globals, mut queue) = registry_queue_init::<TestClient>(&conn).unwrap();
        let qh = queue.handle();
        let compositor: wl_compositor::WlCompositor = globals.bind(&qh, 4..=6, ()).unwrap();
        let shm: wl_shm::WlShm = globals.bind(&qh, 1..=1, ()).unwrap();

        let surface = compositor.create_surface(&qh, ());
        let file = tempfile::tempfile().unwrap();
        file.set_len(64).unwrap();
        let pool = shm.create_pool(file.as_fd(), 64, &qh, ());
        let buffer = pool.create_buffer(0, 4, 4, 16, wl_shm::Format::Argb8888, &qh, ());
        surface.attach(Some(&buffer), 0, 0);
        // the pool is unmapped before the commit reads it
        pool.destroy();
        buffer.destroy();
        surface.commit();

        let mut client = TestClient::default();
        queue.roundtrip(&mut client).is_err()
    });

    assert!(failed);
    harness.pump_until(|h| h.connection_count() == 0);
    assert!(lock_scene(&harness.scene).surfaces.is_empty());
}

#[test]
fn test_shm_pool_with_bad_size_is_rejected() {
    let mut harness = Harness::new();
    let failed = harness.run_client(|stream| {
        let conn = Connection::from_socket(stream).unwrap();
        let (globals, mut queue) = registry_queue_init::<TestClient>(&conn).unwrap();
        let qh = queue.handle();
        let shm: wl_shm::WlShm = globals.bind(&qh, 1..=1, ()).unwrap();
        let file = tempfile::tempfile().unwrap();
        let _pool = shm.create_pool(file.as_fd(), 0, &qh, ());
        let mut client = TestClient::default();
        queue.roundtrip(&mut client).is_err()
    });
    assert!(failed);
}

#[test]
fn test_output_global_follows_scene() {
    let mut harness = Harness::new();
    assert_eq!(harness.state.output_globals.len(), 1);

    let id = lock_scene(&harness.scene).add_output(
        "HOST-2".to_string(),
        OutputMode::new(800, 600, 60000),
        2.0,
    );
    harness.state.sync_outputs();
    assert_eq!(harness.state.output_globals.len(), 2);

    lock_scene(&harness.scene).outputs.remove(id);
    harness.state.sync_outputs();
    assert_eq!(harness.state.output_globals.len(), 1);
}

#[test]
fn test_socket_name_in_use() {
    let dir = tempfile::tempdir().unwrap();
    let first = WaylandServer::new(dir.path(), Some("wayland-test")).unwrap();
    assert_eq!(first.socket_name(), "wayland-test");
    assert!(first.socket_path().exists());

    let second = WaylandServer::new(dir.path(), Some("wayland-test"));
    assert!(matches!(second, Err(ServerError::SocketInUse(_))));

    let auto = WaylandServer::new(dir.path(), None).unwrap();
    assert_eq!(auto.socket_name(), "wayland-0");
}

#[test]
fn test_implementation_error_code() {
    use wayland_client::protocol::wl_display;
    assert_eq!(
        super::dispatch::IMPLEMENTATION_ERROR,
        wl_display::Error::Implementation as u32
    );
}

#[derive(Debug, Default)]
struct TestClient {
    configure_serial: Option<u32>,
    toplevel_configures: u32,
    released: bool,
}

impl Dispatch<wl_registry::WlRegistry, GlobalListContents> for TestClient {
    fn event(
        _state: &mut Self,
        _proxy: &wl_registry::WlRegistry,
        _event: wl_registry::Event,
        _data: &GlobalListContents,
        _conn: &Connection,
        _qh: &QueueHandle<Self>,
    ) {
    }
}

impl Dispatch<xdg_wm_base::XdgWmBase, ()> for TestClient {
    fn event(
        _state: &mut Self,
        proxy: &xdg_wm_base::XdgWmBase,
        event: xdg_wm_base::Event,
        _data: &(),
        _conn: &Connection,
        _qh: &QueueHandle<Self>,
    ) {
        if let xdg_wm_base::Event::Ping { serial } = event {
            proxy.pong(serial);
        }
    }
}

impl Dispatch<xdg_surface::XdgSurface, ()> for TestClient {
    fn event(
        state: &mut Self,
        _proxy: &xdg_surface::XdgSurface,
        event: xdg_surface::Event,
        _data: &(),
        _conn: &Connection,
        _qh: &QueueHandle<Self>,
    ) {
        if let xdg_surface::Event::Configure { serial } = event {
            state.configure_serial = Some(serial);
        }
    }
}

impl Dispatch<xdg_toplevel::XdgToplevel, ()> for TestClient {
    fn event(
        state: &mut Self,
        _proxy: &xdg_toplevel::XdgToplevel,
        event: xdg_toplevel::Event,
        _data: &(),
        _conn: &Connection,
        _qh: &QueueHandle<Self>,
    ) {
        if let xdg_toplevel::Event::Configure { .. } = event {
            state.toplevel_configures += 1;
        }
    }
}

impl Dispatch<wl_buffer::WlBuffer, ()> for TestClient {
    fn event(
        state: &mut Self,
        _proxy: &wl_buffer::WlBuffer,
        event: wl_buffer::Event,
        _data: &(),
        _conn: &Connection,
        _qh: &QueueHandle<Self>,
    ) {
        if let wl_buffer::Event::Release = event {
            state.released = true;
        }
    }
}

delegate_noop!(TestClient: ignore wl_compositor::WlCompositor);
delegate_noop!(TestClient: ignore wl_surface::WlSurface);
delegate_noop!(TestClient: ignore wl_shm::WlShm);
delegate_noop!(TestClient: ignore wl_shm_pool::WlShmPool);
