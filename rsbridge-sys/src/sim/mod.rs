//! An in-process [`Sdk`] with simulated devices.
//!
//! Every handle is an address into one object table guarded by a single lock. Callbacks are
//! always invoked from threads the simulator spawns, never from the caller's thread, and never
//! while the lock is held.

mod state;

#[cfg(test)]
mod tests;

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::thread;
use std::time::{Duration, Instant};

use log::{error, info, warn};
use parking_lot::{Condvar, Mutex};

pub use state::{DeviceSpec, FrameSpec, NotificationSpec, ObjectKind, SensorSpec};
use state::{
    ActivePipeline, Fault, Object, PipelineState, QueueState, SensorKey, SensorState, SimFrame,
    SimResult, State, Streamer,
};

use crate::{
    CameraInfo, DevicesChangedCallback, ErrorOut, ExceptionType, Extension, FrameCallback,
    FrameMetadata, Format, LogCallback, LogSeverity, NotificationCategory, NotificationsCallback,
    ProcessingBlockKind, Raw, RawContext, RawDevice, RawDeviceList, RawError, RawFrame,
    RawFrameQueue, RawNotification, RawPipeline, RawPipelineProfile, RawProcessingBlock,
    RawSensor, RawSensorList, RawStreamProfile, RawStreamProfileList, Sdk, Stream, StreamProfileData, TimestampDomain,
};

struct Inner {
    state: Mutex<State>,
    frame_ready: Condvar,
}

impl Drop for Inner {
    fn drop(&mut self) {
        let state = self.state.get_mut();
        let mut streamers: Vec<_> = state
            .sensors
            .values_mut()
            .filter_map(|sensor| sensor.streamer.take())
            .collect();
        streamers.extend(state.objects.values_mut().filter_map(|object| match object {
            Object::Pipeline(pipeline) => pipeline.streamer.take(),
            _ => None,
        }));
        for streamer in streamers {
            halt(Some(streamer));
        }
    }
}

/// A simulated SDK. Clones share the same devices and handles.
#[derive(Clone)]
pub struct SimSdk {
    inner: Arc<Inner>,
}

impl Default for SimSdk {
    fn default() -> Self {
        Self::new()
    }
}

impl SimSdk {
    pub fn new() -> Self {
        SimSdk {
            inner: Arc::new(Inner {
                state: Mutex::new(State::new()),
                frame_ready: Condvar::new(),
            }),
        }
    }

    /// Plugs in a device and reports it to every context's devices-changed callback.
    pub fn connect(&self, device: DeviceSpec) {
        let serial = device.serial.clone();
        {
            let mut state = self.inner.state.lock();
            if state.devices.iter().any(|d| d.serial == serial) {
                warn!("device {serial} is already connected");
                return;
            }
            for (index, sensor) in device.sensors.iter().enumerate() {
                state
                    .sensors
                    .insert((serial.clone(), index), SensorState::new(sensor.clone()));
            }
            state.devices.push(device);
        }
        info!("simulated device {serial} connected");
        self.log(LogSeverity::Info, &format!("Device {serial} connected"));
        self.devices_changed(Vec::new(), vec![serial]);
    }

    /// Unplugs a device, stopping its sensors. Returns `false` if it was not connected.
    pub fn disconnect(&self, serial: &str) -> bool {
        let detached: Vec<SensorState> = {
            let mut state = self.inner.state.lock();
            let Some(position) = state.devices.iter().position(|d| d.serial == serial) else {
                return false;
            };
            state.devices.remove(position);
            let keys: Vec<SensorKey> = state
                .sensors
                .keys()
                .filter(|key| key.0 == serial)
                .cloned()
                .collect();
            keys.iter().filter_map(|key| state.sensors.remove(key)).collect()
        };
        for mut sensor in detached {
            halt(sensor.streamer.take());
        }
        info!("simulated device {serial} disconnected");
        self.log(LogSeverity::Info, &format!("Device {serial} disconnected"));
        self.devices_changed(vec![serial.to_owned()], Vec::new());
        true
    }

    /// Raises a notification on a sensor. Returns `false` if nobody is listening.
    pub fn notify(&self, serial: &str, sensor: usize, notification: NotificationSpec) -> bool {
        let (callback, addr) = {
            let mut state = self.inner.state.lock();
            let Some(callback) = state
                .sensors
                .get(&(serial.to_owned(), sensor))
                .and_then(|s| s.notifications.clone())
            else {
                return false;
            };
            (callback, state.insert(Object::Notification(notification)))
        };
        on_worker("sim-notify", move || {
            if let Some(raw) = Raw::from_addr(addr) {
                callback.on_notification(raw);
            }
        });
        self.inner.state.lock().remove(addr, ObjectKind::Notification);
        true
    }

    /// Delivers `count` frames from a started sensor on a worker thread.
    ///
    /// Returns how many frames were delivered.
    pub fn emit_frames(&self, serial: &str, sensor: usize, count: usize) -> usize {
        let inner = self.inner.clone();
        let key = (serial.to_owned(), sensor);
        let delivered = Arc::new(AtomicUsize::new(0));
        let counter = delivered.clone();
        on_worker("sim-frames", move || {
            for _ in 0..count {
                if !deliver_frame(&inner, &key) {
                    break;
                }
                counter.fetch_add(1, Ordering::Relaxed);
            }
        });
        delivered.load(Ordering::Relaxed)
    }

    /// Delivers `count` frame sets to every pipeline streaming the device `serial`.
    ///
    /// Returns how many frame sets were delivered.
    pub fn emit_framesets(&self, serial: &str, count: usize) -> usize {
        let pipelines: Vec<usize> = self
            .inner
            .state
            .lock()
            .objects
            .iter()
            .filter_map(|(addr, object)| match object {
                Object::Pipeline(PipelineState {
                    active: Some(active),
                    ..
                }) if active.device == serial => Some(*addr),
                _ => None,
            })
            .collect();
        let inner = self.inner.clone();
        let delivered = Arc::new(AtomicUsize::new(0));
        let counter = delivered.clone();
        on_worker("sim-framesets", move || {
            for _ in 0..count {
                for pipeline in &pipelines {
                    if deliver_frameset(&inner, *pipeline) {
                        counter.fetch_add(1, Ordering::Relaxed);
                    }
                }
            }
        });
        delivered.load(Ordering::Relaxed)
    }

    /// Allocates a standalone frame with one reference owned by the caller.
    pub fn create_frame(&self, spec: FrameSpec) -> Option<RawFrame> {
        let frame = Arc::new(SimFrame::synthesize(spec));
        let addr = self.inner.state.lock().insert(Object::Frame { refs: 1, frame });
        Raw::from_addr(addr)
    }

    /// Makes the next call to `function` fail with the given error.
    pub fn fail_next(&self, function: &str, exception: ExceptionType, message: &str) {
        self.inner
            .state
            .lock()
            .failures
            .insert(function.to_owned(), Fault::new(exception, message));
    }

    /// Number of live handles of `kind`.
    pub fn live(&self, kind: ObjectKind) -> usize {
        self.inner.state.lock().live(kind)
    }

    /// Number of live handles of any kind.
    pub fn live_total(&self) -> usize {
        self.inner.state.lock().objects.len()
    }

    /// Outstanding references to `frame`, zero once it has been released.
    pub fn frame_refs(&self, frame: RawFrame) -> u32 {
        match self.inner.state.lock().objects.get(&frame.addr()) {
            Some(Object::Frame { refs, .. }) => *refs,
            _ => 0,
        }
    }

    /// Number of release or delete calls made on handles that were not live.
    pub fn invalid_releases(&self) -> u64 {
        self.inner.state.lock().invalid_releases
    }

    /// Number of frames a producer handed to a frame queue that was already deleted.
    pub fn orphaned_frames(&self) -> u64 {
        self.inner.state.lock().orphaned_frames
    }

    pub fn is_streaming(&self, serial: &str, sensor: usize) -> bool {
        self.inner
            .state
            .lock()
            .sensors
            .get(&(serial.to_owned(), sensor))
            .is_some_and(|s| s.frames.is_some())
    }

    /// Whether started sensors produce frames on their own at the profile's rate.
    ///
    /// Enabled by default. When disabled, frames only arrive through [`emit_frames`](Self::emit_frames).
    pub fn set_auto_stream(&self, enabled: bool) {
        self.inner.state.lock().auto_stream = enabled;
    }

    /// Writes to the registered log callback, if `severity` passes its threshold.
    pub fn log(&self, severity: LogSeverity, message: &str) {
        let callback = match &self.inner.state.lock().logger {
            Some((min, callback)) if severity >= *min => callback.clone(),
            _ => return,
        };
        callback.on_log(severity, message);
    }

    fn call<R: Default>(
        &self,
        function: &'static str,
        error: ErrorOut<'_>,
        f: impl FnOnce(&mut State) -> SimResult<R>,
    ) -> R {
        let mut state = self.inner.state.lock();
        let outcome = match state.failures.remove(function) {
            Some(fault) => Err(fault),
            None => f(&mut state),
        };
        match outcome {
            Ok(value) => value,
            Err(fault) => {
                *error = Raw::from_addr(state.raise(function, fault));
                R::default()
            }
        }
    }

    /// Blocks until `pop` yields a frame or `timeout_ms` runs out.
    fn wait_for(
        &self,
        function: &'static str,
        timeout_ms: u32,
        error: ErrorOut<'_>,
        mut pop: impl FnMut(&mut State) -> SimResult<Option<usize>>,
    ) -> Option<RawFrame> {
        let deadline = Instant::now() + Duration::from_millis(u64::from(timeout_ms));
        let mut state = self.inner.state.lock();
        if let Some(fault) = state.failures.remove(function) {
            *error = Raw::from_addr(state.raise(function, fault));
            return None;
        }
        loop {
            match pop(&mut state) {
                Ok(Some(frame)) => return Raw::from_addr(frame),
                Ok(None) => {}
                Err(fault) => {
                    *error = Raw::from_addr(state.raise(function, fault));
                    return None;
                }
            }
            if self
                .inner
                .frame_ready
                .wait_until(&mut state, deadline)
                .timed_out()
            {
                return pop(&mut state).ok().flatten().and_then(Raw::from_addr);
            }
        }
    }

    fn release(&self, addr: usize, kind: ObjectKind) {
        let removed = self.inner.state.lock().remove(addr, kind);
        drop(removed);
    }

    fn devices_changed(&self, removed: Vec<String>, added: Vec<String>) {
        let pending: Vec<_> = {
            let mut state = self.inner.state.lock();
            let callbacks: Vec<Arc<dyn DevicesChangedCallback>> = state
                .objects
                .values()
                .filter_map(|object| match object {
                    Object::Context {
                        devices_changed: Some(callback),
                    } => Some(callback.clone()),
                    _ => None,
                })
                .collect();
            callbacks
                .into_iter()
                .map(|callback| {
                    let r = state.insert(Object::DeviceList(removed.clone()));
                    let a = state.insert(Object::DeviceList(added.clone()));
                    (callback, r, a)
                })
                .collect()
        };
        if pending.is_empty() {
            return;
        }
        on_worker("sim-hotplug", move || {
            for (callback, removed, added) in pending {
                callback.on_devices_changed(Raw::from_addr(removed), Raw::from_addr(added));
            }
        });
    }
}

/// Runs `f` on a fresh thread and waits for it.
fn on_worker(name: &str, f: impl FnOnce() + Send + 'static) {
    match thread::Builder::new().name(name.to_owned()).spawn(f) {
        Ok(handle) => {
            if handle.join().is_err() {
                error!("{name} worker panicked");
            }
        }
        Err(err) => error!("failed to spawn {name} worker: {err}"),
    }
}

/// Stops a streaming thread and waits for it, unless called from that thread.
fn halt(streamer: Option<Streamer>) {
    let Some(Streamer { stop, thread }) = streamer else {
        return;
    };
    stop.store(true, Ordering::Release);
    if thread.thread().id() != thread::current().id() && thread.join().is_err() {
        error!("streaming thread panicked");
    }
}

/// Synthesizes the next frame of a started sensor and hands it to its callback.
fn deliver_frame(inner: &Inner, key: &SensorKey) -> bool {
    let (callback, addr) = {
        let mut state = inner.state.lock();
        let Some(sensor) = state.sensors.get_mut(key) else {
            return false;
        };
        let (Some(callback), Some(profile)) = (sensor.frames.clone(), sensor.opened.first().copied())
        else {
            return false;
        };
        sensor.counter += 1;
        let spec = FrameSpec {
            profile,
            number: sensor.counter,
            depth_units: sensor.spec.depth_units,
        };
        let frame = Arc::new(SimFrame::synthesize(spec));
        (callback, state.insert(Object::Frame { refs: 1, frame }))
    };
    if let Some(raw) = Raw::from_addr(addr) {
        callback.on_frame(raw);
    }
    true
}

/// Synthesizes the next frame set of a running pipeline and wakes its waiters.
fn deliver_frameset(inner: &Inner, pipeline: usize) -> bool {
    if !inner.state.lock().push_frameset(pipeline) {
        return false;
    }
    inner.frame_ready.notify_all();
    true
}

/// Calls `tick` at `fps` until it returns `false`, the simulator is dropped or the streamer is
/// halted.
fn spawn_streamer(
    inner: Weak<Inner>,
    name: String,
    fps: i32,
    tick: impl Fn(&Inner) -> bool + Send + 'static,
) -> Option<Streamer> {
    let interval = Duration::from_millis(1000 / u64::from(fps.max(1).unsigned_abs()));
    let stop = Arc::new(AtomicBool::new(false));
    let flag = stop.clone();
    let spawned = thread::Builder::new().name(name).spawn(move || {
        while !flag.load(Ordering::Acquire) {
            thread::sleep(interval);
            if flag.load(Ordering::Acquire) {
                break;
            }
            let Some(inner) = inner.upgrade() else {
                break;
            };
            if !tick(inner.as_ref()) {
                break;
            }
        }
    });
    match spawned {
        Ok(thread) => Some(Streamer { stop, thread }),
        Err(err) => {
            error!("failed to spawn streaming thread: {err}");
            None
        }
    }
}

fn colorize(input: &SimFrame) -> SimResult<SimFrame> {
    if !input.has(Extension::DepthFrame) {
        return Err(Fault::new(
            ExceptionType::InvalidValue,
            "colorizer expects a depth frame",
        ));
    }
    let profile = StreamProfileData {
        stream: Stream::Color,
        format: Format::Rgb8,
        ..input.profile
    };
    let stride = input.width * 3;
    let width = input.width.max(0) as usize;
    let mut data = Vec::with_capacity((stride * input.height).max(0) as usize);
    for row in input.data.chunks(input.stride.max(1) as usize) {
        for pixel in row.chunks_exact(2).take(width) {
            let value = pixel[1];
            data.extend_from_slice(&[value, value, 255 - value]);
        }
    }
    Ok(input.derive(profile, stride, data))
}

fn decimate(input: &SimFrame) -> SimResult<SimFrame> {
    let bytes = (input.bits_per_pixel / 8).max(0) as usize;
    if !input.has(Extension::VideoFrame) || bytes == 0 {
        return Err(Fault::new(
            ExceptionType::InvalidValue,
            "decimation expects a video frame",
        ));
    }
    let profile = StreamProfileData {
        width: (input.width / 2).max(1),
        height: (input.height / 2).max(1),
        ..input.profile
    };
    let stride = profile.width * bytes as i32;
    let mut data = Vec::with_capacity((stride * profile.height) as usize);
    for y in 0..profile.height as usize {
        let row = y * 2 * input.stride as usize;
        for x in 0..profile.width as usize {
            let at = row + x * 2 * bytes;
            if let Some(pixel) = input.data.get(at..at + bytes) {
                data.extend_from_slice(pixel);
            }
        }
    }
    Ok(input.derive(profile, stride, data))
}

fn run_block(state: &mut State, block: usize, input: &SimFrame) -> SimResult<()> {
    let (kind, output) = state.block(block)?;
    let Some(queue) = *output else {
        return Err(Fault::sequence("processing block has no output queue"));
    };
    let frame = match kind {
        ProcessingBlockKind::Colorizer => colorize(input)?,
        ProcessingBlockKind::DecimationFilter => decimate(input)?,
    };
    let addr = state.insert(Object::Frame {
        refs: 1,
        frame: Arc::new(frame),
    });
    state.push_frame(queue, addr);
    Ok(())
}

fn info_not_supported(info: CameraInfo) -> Fault {
    Fault::new(
        ExceptionType::InvalidValue,
        format!("{info:?} is not supported"),
    )
}

impl Sdk for SimSdk {
    fn failed_function(&self, error: RawError) -> String {
        match self.inner.state.lock().objects.get(&error.addr()) {
            Some(Object::Error { function, .. }) => function.clone(),
            _ => String::new(),
        }
    }

    fn error_message(&self, error: RawError) -> String {
        match self.inner.state.lock().objects.get(&error.addr()) {
            Some(Object::Error { message, .. }) => message.clone(),
            _ => String::new(),
        }
    }

    fn exception_type(&self, error: RawError) -> ExceptionType {
        match self.inner.state.lock().objects.get(&error.addr()) {
            Some(Object::Error { exception, .. }) => *exception,
            _ => ExceptionType::Unknown,
        }
    }

    fn free_error(&self, error: RawError) {
        self.release(error.addr(), ObjectKind::Error);
    }

    fn create_context(&self, api_version: i32, error: ErrorOut<'_>) -> Option<RawContext> {
        self.call("create_context", error, |state| {
            if api_version / 100 != crate::API_VERSION / 100 {
                return Err(Fault::new(
                    ExceptionType::InvalidValue,
                    format!(
                        "API version mismatch: {api_version} requested, {} available",
                        crate::API_VERSION
                    ),
                ));
            }
            Ok(Raw::from_addr(state.insert(Object::Context {
                devices_changed: None,
            })))
        })
    }

    fn delete_context(&self, context: RawContext) {
        self.release(context.addr(), ObjectKind::Context);
    }

    fn query_devices(&self, context: RawContext, error: ErrorOut<'_>) -> Option<RawDeviceList> {
        self.call("query_devices", error, |state| {
            match state.objects.get(&context.addr()) {
                Some(Object::Context { .. }) => {}
                _ => return Err(Fault::invalid("context")),
            }
            let serials = state.devices.iter().map(|d| d.serial.clone()).collect();
            Ok(Raw::from_addr(state.insert(Object::DeviceList(serials))))
        })
    }

    fn set_devices_changed_callback(
        &self,
        context: RawContext,
        callback: Box<dyn DevicesChangedCallback>,
        error: ErrorOut<'_>,
    ) {
        let previous = self.call("set_devices_changed_callback", error, |state| {
            match state.objects.get_mut(&context.addr()) {
                Some(Object::Context { devices_changed }) => {
                    Ok(devices_changed.replace(Arc::from(callback)))
                }
                _ => Err(Fault::invalid("context")),
            }
        });
        drop(previous);
    }

    fn device_count(&self, list: RawDeviceList, error: ErrorOut<'_>) -> i32 {
        self.call("device_count", error, |state| {
            Ok(state.device_list(list.addr())?.len() as i32)
        })
    }

    fn create_device(
        &self,
        list: RawDeviceList,
        index: i32,
        error: ErrorOut<'_>,
    ) -> Option<RawDevice> {
        self.call("create_device", error, |state| {
            let serials = state.device_list(list.addr())?;
            let serial = usize::try_from(index)
                .ok()
                .and_then(|i| serials.get(i).cloned())
                .ok_or_else(|| {
                    Fault::new(
                        ExceptionType::InvalidValue,
                        format!("device index {index} out of range"),
                    )
                })?;
            if !state.devices.iter().any(|d| d.serial == serial) {
                return Err(Fault::disconnected(&serial));
            }
            Ok(Raw::from_addr(state.insert(Object::Device(serial))))
        })
    }

    fn device_list_contains(
        &self,
        list: RawDeviceList,
        device: RawDevice,
        error: ErrorOut<'_>,
    ) -> bool {
        self.call("device_list_contains", error, |state| {
            let serial = state.device_serial(device.addr())?;
            Ok(state.device_list(list.addr())?.iter().any(|s| s == serial))
        })
    }

    fn delete_device_list(&self, list: RawDeviceList) {
        self.release(list.addr(), ObjectKind::DeviceList);
    }

    fn delete_device(&self, device: RawDevice) {
        self.release(device.addr(), ObjectKind::Device);
    }

    fn supports_device_info(
        &self,
        device: RawDevice,
        _info: CameraInfo,
        error: ErrorOut<'_>,
    ) -> bool {
        self.call("supports_device_info", error, |state| {
            state.device(device.addr()).map(|_| true)
        })
    }

    fn device_info(
        &self,
        device: RawDevice,
        info: CameraInfo,
        error: ErrorOut<'_>,
    ) -> Option<String> {
        self.call("device_info", error, |state| {
            let device = state.device(device.addr())?;
            Ok(Some(match info {
                CameraInfo::Name => device.name.clone(),
                CameraInfo::SerialNumber => device.serial.clone(),
                CameraInfo::FirmwareVersion => device.firmware_version.clone(),
                CameraInfo::ProductId => device.product_id.clone(),
                CameraInfo::ProductLine => "D400".to_owned(),
            }))
        })
    }

    fn query_sensors(&self, device: RawDevice, error: ErrorOut<'_>) -> Option<RawSensorList> {
        self.call("query_sensors", error, |state| {
            let device = state.device(device.addr())?;
            let keys = (0..device.sensors.len())
                .map(|index| (device.serial.clone(), index))
                .collect();
            Ok(Raw::from_addr(state.insert(Object::SensorList(keys))))
        })
    }

    fn sensors_count(&self, list: RawSensorList, error: ErrorOut<'_>) -> i32 {
        self.call("sensors_count", error, |state| {
            Ok(state.sensor_list(list.addr())?.len() as i32)
        })
    }

    fn create_sensor(
        &self,
        list: RawSensorList,
        index: i32,
        error: ErrorOut<'_>,
    ) -> Option<RawSensor> {
        self.call("create_sensor", error, |state| {
            let keys = state.sensor_list(list.addr())?;
            let key = usize::try_from(index)
                .ok()
                .and_then(|i| keys.get(i).cloned())
                .ok_or_else(|| {
                    Fault::new(
                        ExceptionType::InvalidValue,
                        format!("sensor index {index} out of range"),
                    )
                })?;
            if !state.sensors.contains_key(&key) {
                return Err(Fault::disconnected(&key.0));
            }
            Ok(Raw::from_addr(state.insert(Object::Sensor(key))))
        })
    }

    fn delete_sensor_list(&self, list: RawSensorList) {
        self.release(list.addr(), ObjectKind::SensorList);
    }

    fn delete_sensor(&self, sensor: RawSensor) {
        self.release(sensor.addr(), ObjectKind::Sensor);
    }

    fn supports_sensor_info(
        &self,
        sensor: RawSensor,
        info: CameraInfo,
        error: ErrorOut<'_>,
    ) -> bool {
        self.call("supports_sensor_info", error, |state| {
            state.sensor(sensor.addr())?;
            Ok(matches!(info, CameraInfo::Name | CameraInfo::SerialNumber))
        })
    }

    fn sensor_info(
        &self,
        sensor: RawSensor,
        info: CameraInfo,
        error: ErrorOut<'_>,
    ) -> Option<String> {
        self.call("sensor_info", error, |state| {
            let (key, sensor) = state.sensor(sensor.addr())?;
            match info {
                CameraInfo::Name => Ok(Some(sensor.spec.name.clone())),
                CameraInfo::SerialNumber => Ok(Some(key.0)),
                _ => Err(info_not_supported(info)),
            }
        })
    }

    fn stream_profiles(
        &self,
        sensor: RawSensor,
        error: ErrorOut<'_>,
    ) -> Option<RawStreamProfileList> {
        self.call("stream_profiles", error, |state| {
            let (_, sensor) = state.sensor(sensor.addr())?;
            let profiles = sensor.spec.profiles.clone();
            Ok(Raw::from_addr(
                state.insert(Object::StreamProfileList(profiles)),
            ))
        })
    }

    fn open(&self, sensor: RawSensor, profiles: &[RawStreamProfile], error: ErrorOut<'_>) {
        self.call("open", error, |state| {
            let requested = profiles
                .iter()
                .map(|p| state.profile(p.addr()))
                .collect::<SimResult<Vec<_>>>()?;
            let (_, sensor) = state.sensor(sensor.addr())?;
            if requested.is_empty() {
                return Err(Fault::new(
                    ExceptionType::InvalidValue,
                    "no stream profiles requested",
                ));
            }
            if !sensor.opened.is_empty() {
                return Err(Fault::sequence("sensor is already opened"));
            }
            if let Some(unknown) = requested.iter().find(|p| !sensor.spec.profiles.contains(p)) {
                return Err(Fault::new(
                    ExceptionType::InvalidValue,
                    format!("profile {} is not offered by this sensor", unknown.unique_id),
                ));
            }
            sensor.opened = requested;
            Ok(())
        })
    }

    fn start(&self, sensor: RawSensor, callback: Box<dyn FrameCallback>, error: ErrorOut<'_>) {
        let inner = Arc::downgrade(&self.inner);
        self.call("start", error, move |state| {
            let auto_stream = state.auto_stream;
            let (key, sensor) = state.sensor(sensor.addr())?;
            let Some(profile) = sensor.opened.first().copied() else {
                return Err(Fault::sequence("start called before open"));
            };
            if sensor.frames.is_some() {
                return Err(Fault::sequence("sensor is already streaming"));
            }
            sensor.frames = Some(Arc::from(callback));
            if auto_stream {
                let name = format!("sim-stream-{}-{}", key.0, key.1);
                sensor.streamer = spawn_streamer(inner, name, profile.fps, move |inner| {
                    deliver_frame(inner, &key)
                });
            }
            Ok(())
        })
    }

    fn stop(&self, sensor: RawSensor, error: ErrorOut<'_>) {
        let (streamer, callback) = self.call("stop", error, |state| {
            let (_, sensor) = state.sensor(sensor.addr())?;
            if sensor.frames.is_none() {
                return Err(Fault::sequence("sensor is not streaming"));
            }
            Ok((sensor.streamer.take(), sensor.frames.take()))
        });
        halt(streamer);
        drop(callback);
    }

    fn close(&self, sensor: RawSensor, error: ErrorOut<'_>) {
        self.call("close", error, |state| {
            let (_, sensor) = state.sensor(sensor.addr())?;
            if sensor.frames.is_some() {
                return Err(Fault::sequence("close called while streaming"));
            }
            if sensor.opened.is_empty() {
                return Err(Fault::sequence("sensor is not opened"));
            }
            sensor.opened.clear();
            Ok(())
        })
    }

    fn set_notifications_callback(
        &self,
        sensor: RawSensor,
        callback: Box<dyn NotificationsCallback>,
        error: ErrorOut<'_>,
    ) {
        let previous = self.call("set_notifications_callback", error, |state| {
            let (_, sensor) = state.sensor(sensor.addr())?;
            Ok(sensor.notifications.replace(Arc::from(callback)))
        });
        drop(previous);
    }

    fn stream_profiles_count(&self, list: RawStreamProfileList, error: ErrorOut<'_>) -> i32 {
        self.call("stream_profiles_count", error, |state| {
            Ok(state.profile_list(list.addr())?.len() as i32)
        })
    }

    fn stream_profile_at(
        &self,
        list: RawStreamProfileList,
        index: i32,
        error: ErrorOut<'_>,
    ) -> Option<RawStreamProfile> {
        self.call("stream_profile_at", error, |state| {
            let profiles = state.profile_list(list.addr())?;
            let profile = usize::try_from(index)
                .ok()
                .and_then(|i| profiles.get(i).copied())
                .ok_or_else(|| {
                    Fault::new(
                        ExceptionType::InvalidValue,
                        format!("profile index {index} out of range"),
                    )
                })?;
            Ok(Raw::from_addr(state.insert(Object::StreamProfile(profile))))
        })
    }

    fn delete_stream_profiles_list(&self, list: RawStreamProfileList) {
        self.release(list.addr(), ObjectKind::StreamProfileList);
    }

    fn stream_profile_data(
        &self,
        profile: RawStreamProfile,
        error: ErrorOut<'_>,
    ) -> Option<StreamProfileData> {
        self.call("stream_profile_data", error, |state| {
            state.profile(profile.addr()).map(Some)
        })
    }

    fn delete_stream_profile(&self, profile: RawStreamProfile) {
        self.release(profile.addr(), ObjectKind::StreamProfile);
    }

    fn notification_description(
        &self,
        notification: RawNotification,
        error: ErrorOut<'_>,
    ) -> Option<String> {
        self.call("notification_description", error, |state| {
            Ok(Some(state.notification(notification.addr())?.description.clone()))
        })
    }

    fn notification_timestamp(&self, notification: RawNotification, error: ErrorOut<'_>) -> f64 {
        self.call("notification_timestamp", error, |state| {
            Ok(state.notification(notification.addr())?.timestamp)
        })
    }

    fn notification_severity(
        &self,
        notification: RawNotification,
        error: ErrorOut<'_>,
    ) -> LogSeverity {
        self.call("notification_severity", error, |state| {
            Ok(state.notification(notification.addr())?.severity)
        })
    }

    fn notification_category(
        &self,
        notification: RawNotification,
        error: ErrorOut<'_>,
    ) -> NotificationCategory {
        self.call("notification_category", error, |state| {
            Ok(state.notification(notification.addr())?.category)
        })
    }

    fn notification_serialized_data(
        &self,
        notification: RawNotification,
        error: ErrorOut<'_>,
    ) -> Option<String> {
        self.call("notification_serialized_data", error, |state| {
            Ok(Some(
                state.notification(notification.addr())?.serialized_data.clone(),
            ))
        })
    }

    fn frame_add_ref(&self, frame: RawFrame, error: ErrorOut<'_>) {
        self.call("frame_add_ref", error, |state| {
            *state.frame_refs_mut(frame.addr())? += 1;
            Ok(())
        })
    }

    fn release_frame(&self, frame: RawFrame) {
        self.inner.state.lock().release_frame_ref(frame.addr());
    }

    fn frame_width(&self, frame: RawFrame, error: ErrorOut<'_>) -> i32 {
        self.call("frame_width", error, |state| Ok(state.frame(frame.addr())?.width))
    }

    fn frame_height(&self, frame: RawFrame, error: ErrorOut<'_>) -> i32 {
        self.call("frame_height", error, |state| Ok(state.frame(frame.addr())?.height))
    }

    fn frame_stride_in_bytes(&self, frame: RawFrame, error: ErrorOut<'_>) -> i32 {
        self.call("frame_stride_in_bytes", error, |state| {
            Ok(state.frame(frame.addr())?.stride)
        })
    }

    fn frame_bits_per_pixel(&self, frame: RawFrame, error: ErrorOut<'_>) -> i32 {
        self.call("frame_bits_per_pixel", error, |state| {
            Ok(state.frame(frame.addr())?.bits_per_pixel)
        })
    }

    fn frame_data(&self, frame: RawFrame, error: ErrorOut<'_>) -> Option<Arc<[u8]>> {
        self.call("frame_data", error, |state| {
            Ok(Some(state.frame(frame.addr())?.data.clone()))
        })
    }

    fn frame_timestamp(&self, frame: RawFrame, error: ErrorOut<'_>) -> f64 {
        self.call("frame_timestamp", error, |state| {
            Ok(state.frame(frame.addr())?.timestamp)
        })
    }

    fn frame_timestamp_domain(&self, frame: RawFrame, error: ErrorOut<'_>) -> TimestampDomain {
        self.call("frame_timestamp_domain", error, |state| {
            Ok(state.frame(frame.addr())?.domain)
        })
    }

    fn frame_number(&self, frame: RawFrame, error: ErrorOut<'_>) -> u64 {
        self.call("frame_number", error, |state| Ok(state.frame(frame.addr())?.number))
    }

    fn supports_frame_metadata(
        &self,
        frame: RawFrame,
        key: FrameMetadata,
        error: ErrorOut<'_>,
    ) -> bool {
        self.call("supports_frame_metadata", error, |state| {
            Ok(state
                .frame(frame.addr())?
                .metadata
                .iter()
                .any(|(k, _)| *k == key))
        })
    }

    fn frame_metadata(&self, frame: RawFrame, key: FrameMetadata, error: ErrorOut<'_>) -> i64 {
        self.call("frame_metadata", error, |state| {
            state
                .frame(frame.addr())?
                .metadata
                .iter()
                .find(|(k, _)| *k == key)
                .map(|(_, value)| *value)
                .ok_or_else(|| {
                    Fault::new(
                        ExceptionType::InvalidValue,
                        format!("{key:?} is not supported by this frame"),
                    )
                })
        })
    }

    fn is_frame_extendable_to(
        &self,
        frame: RawFrame,
        extension: Extension,
        error: ErrorOut<'_>,
    ) -> bool {
        self.call("is_frame_extendable_to", error, |state| {
            Ok(state.frame(frame.addr())?.has(extension))
        })
    }

    fn frame_stream_profile(
        &self,
        frame: RawFrame,
        error: ErrorOut<'_>,
    ) -> Option<RawStreamProfile> {
        self.call("frame_stream_profile", error, |state| {
            let profile = state.frame(frame.addr())?.profile;
            Ok(Raw::from_addr(state.insert(Object::StreamProfile(profile))))
        })
    }

    fn depth_frame_distance(&self, frame: RawFrame, x: i32, y: i32, error: ErrorOut<'_>) -> f32 {
        self.call("depth_frame_distance", error, |state| {
            let frame = state.frame(frame.addr())?;
            if !frame.has(Extension::DepthFrame) {
                return Err(Fault::new(
                    ExceptionType::InvalidValue,
                    "frame is not a depth frame",
                ));
            }
            if x < 0 || y < 0 || x >= frame.width || y >= frame.height {
                return Err(Fault::new(
                    ExceptionType::InvalidValue,
                    format!("pixel ({x}, {y}) is out of range"),
                ));
            }
            let at = (y * frame.stride + x * 2) as usize;
            let raw = frame
                .data
                .get(at..at + 2)
                .map(|b| u16::from_le_bytes([b[0], b[1]]))
                .unwrap_or_default();
            Ok(f32::from(raw) * frame.depth_units)
        })
    }

    fn embedded_frames_count(&self, frame: RawFrame, error: ErrorOut<'_>) -> i32 {
        self.call("embedded_frames_count", error, |state| {
            let frame = state.frame(frame.addr())?;
            if !frame.has(Extension::CompositeFrame) {
                return Err(Fault::new(
                    ExceptionType::InvalidValue,
                    "frame is not a frame set",
                ));
            }
            Ok(frame.embedded.len() as i32)
        })
    }

    fn extract_frame(&self, frame: RawFrame, index: i32, error: ErrorOut<'_>) -> Option<RawFrame> {
        self.call("extract_frame", error, |state| {
            let set = state.frame(frame.addr())?;
            if !set.has(Extension::CompositeFrame) {
                return Err(Fault::new(
                    ExceptionType::InvalidValue,
                    "frame is not a frame set",
                ));
            }
            let embedded = usize::try_from(index)
                .ok()
                .and_then(|i| set.embedded.get(i).copied())
                .ok_or_else(|| {
                    Fault::new(
                        ExceptionType::InvalidValue,
                        format!("frame index {index} out of range"),
                    )
                })?;
            *state.frame_refs_mut(embedded)? += 1;
            Ok(Raw::from_addr(embedded))
        })
    }

    fn create_frame_queue(&self, capacity: i32, error: ErrorOut<'_>) -> Option<RawFrameQueue> {
        self.call("create_frame_queue", error, |state| {
            let capacity = usize::try_from(capacity)
                .ok()
                .filter(|c| *c > 0)
                .ok_or_else(|| {
                    Fault::new(
                        ExceptionType::InvalidValue,
                        format!("invalid queue capacity {capacity}"),
                    )
                })?;
            Ok(Raw::from_addr(state.insert(Object::FrameQueue(QueueState {
                capacity,
                frames: Default::default(),
            }))))
        })
    }

    fn delete_frame_queue(&self, queue: RawFrameQueue) {
        let mut state = self.inner.state.lock();
        if let Some(Object::FrameQueue(queue)) = state.remove(queue.addr(), ObjectKind::FrameQueue)
        {
            for frame in queue.frames {
                state.release_frame_ref(frame);
            }
        }
    }

    fn try_wait_for_frame(
        &self,
        queue: RawFrameQueue,
        timeout_ms: u32,
        error: ErrorOut<'_>,
    ) -> Option<RawFrame> {
        self.wait_for("try_wait_for_frame", timeout_ms, error, |state| {
            Ok(state.queue(queue.addr())?.frames.pop_front())
        })
    }

    fn poll_for_frame(&self, queue: RawFrameQueue, error: ErrorOut<'_>) -> Option<RawFrame> {
        self.call("poll_for_frame", error, |state| {
            Ok(state
                .queue(queue.addr())?
                .frames
                .pop_front()
                .and_then(Raw::from_addr))
        })
    }

    fn enqueue_frame(&self, frame: RawFrame, queue: RawFrameQueue) {
        {
            let mut state = self.inner.state.lock();
            if state.frame(frame.addr()).is_err() {
                state.invalid_releases += 1;
                error!("enqueue of a frame that is not live: {frame:?}");
                return;
            }
            if !state.push_frame(queue.addr(), frame.addr()) {
                warn!("frame enqueued into a queue that is not live: {queue:?}");
                return;
            }
        }
        self.inner.frame_ready.notify_all();
    }

    fn create_processing_block(
        &self,
        kind: ProcessingBlockKind,
        error: ErrorOut<'_>,
    ) -> Option<RawProcessingBlock> {
        self.call("create_processing_block", error, |state| {
            Ok(Raw::from_addr(state.insert(Object::ProcessingBlock {
                kind,
                output: None,
            })))
        })
    }

    fn delete_processing_block(&self, block: RawProcessingBlock) {
        self.release(block.addr(), ObjectKind::ProcessingBlock);
    }

    fn start_processing_queue(
        &self,
        block: RawProcessingBlock,
        queue: RawFrameQueue,
        error: ErrorOut<'_>,
    ) {
        self.call("start_processing_queue", error, |state| {
            state.queue(queue.addr())?;
            let (_, output) = state.block(block.addr())?;
            *output = Some(queue.addr());
            Ok(())
        })
    }

    fn process_frame(&self, block: RawProcessingBlock, frame: RawFrame, error: ErrorOut<'_>) {
        const FUNCTION: &str = "process_frame";
        let mut state = self.inner.state.lock();
        let input = state.frame(frame.addr()).map(Arc::clone);
        if input.is_ok() {
            state.release_frame_ref(frame.addr());
        }
        let outcome = match state.failures.remove(FUNCTION) {
            Some(fault) => Err(fault),
            None => input.and_then(|input| run_block(&mut state, block.addr(), &input)),
        };
        match outcome {
            Ok(()) => {
                drop(state);
                self.inner.frame_ready.notify_all();
            }
            Err(fault) => *error = Raw::from_addr(state.raise(FUNCTION, fault)),
        }
    }

    fn create_pipeline(&self, context: RawContext, error: ErrorOut<'_>) -> Option<RawPipeline> {
        self.call("create_pipeline", error, |state| {
            match state.objects.get(&context.addr()) {
                Some(Object::Context { .. }) => {}
                _ => return Err(Fault::invalid("context")),
            }
            Ok(Raw::from_addr(
                state.insert(Object::Pipeline(PipelineState::new(context.addr()))),
            ))
        })
    }

    fn delete_pipeline(&self, pipeline: RawPipeline) {
        let streamer = {
            let mut state = self.inner.state.lock();
            match state.remove(pipeline.addr(), ObjectKind::Pipeline) {
                Some(Object::Pipeline(mut pipeline)) => {
                    for frame in pipeline.frames.drain(..) {
                        state.release_frame_ref(frame);
                    }
                    pipeline.streamer.take()
                }
                _ => None,
            }
        };
        halt(streamer);
    }

    fn pipeline_start(
        &self,
        pipeline: RawPipeline,
        error: ErrorOut<'_>,
    ) -> Option<RawPipelineProfile> {
        let inner = Arc::downgrade(&self.inner);
        self.call("pipeline_start", error, move |state| {
            let (started, context) = {
                let pipeline = state.pipeline(pipeline.addr())?;
                (pipeline.active.is_some(), pipeline.context)
            };
            if started {
                return Err(Fault::sequence("pipeline is already started"));
            }
            if !matches!(state.objects.get(&context), Some(Object::Context { .. })) {
                return Err(Fault::invalid("context"));
            }
            let Some(device) = state.devices.first() else {
                return Err(Fault::new(
                    ExceptionType::Backend,
                    "no device connected",
                ));
            };
            let serial = device.serial.clone();
            let streams: Vec<(StreamProfileData, f32)> = device
                .sensors
                .iter()
                .filter_map(|sensor| sensor.profiles.first().map(|p| (*p, sensor.depth_units)))
                .collect();
            let profiles: Vec<StreamProfileData> = streams.iter().map(|(p, _)| *p).collect();
            let fps = profiles.first().map_or(30, |p| p.fps);

            let streamer = if state.auto_stream {
                let addr = pipeline.addr();
                spawn_streamer(inner, format!("sim-pipeline-{serial}"), fps, move |inner| {
                    deliver_frameset(inner, addr)
                })
            } else {
                None
            };
            let running = state.pipeline(pipeline.addr())?;
            running.active = Some(ActivePipeline {
                device: serial.clone(),
                streams,
                counter: 0,
            });
            running.streamer = streamer;
            Ok(Raw::from_addr(state.insert(Object::PipelineProfile {
                device: serial,
                profiles,
            })))
        })
    }

    fn pipeline_stop(&self, pipeline: RawPipeline, error: ErrorOut<'_>) {
        let streamer = self.call("pipeline_stop", error, |state| {
            let running = state.running_pipeline(pipeline.addr())?;
            running.active = None;
            let streamer = running.streamer.take();
            let frames: Vec<usize> = running.frames.drain(..).collect();
            for frame in frames {
                state.release_frame_ref(frame);
            }
            Ok(streamer)
        });
        halt(streamer);
    }

    fn pipeline_try_wait_for_frames(
        &self,
        pipeline: RawPipeline,
        timeout_ms: u32,
        error: ErrorOut<'_>,
    ) -> Option<RawFrame> {
        self.wait_for("pipeline_try_wait_for_frames", timeout_ms, error, |state| {
            Ok(state.running_pipeline(pipeline.addr())?.frames.pop_front())
        })
    }

    fn pipeline_poll_for_frames(
        &self,
        pipeline: RawPipeline,
        error: ErrorOut<'_>,
    ) -> Option<RawFrame> {
        self.call("pipeline_poll_for_frames", error, |state| {
            Ok(state
                .running_pipeline(pipeline.addr())?
                .frames
                .pop_front()
                .and_then(Raw::from_addr))
        })
    }

    fn pipeline_active_profile(
        &self,
        pipeline: RawPipeline,
        error: ErrorOut<'_>,
    ) -> Option<RawPipelineProfile> {
        self.call("pipeline_active_profile", error, |state| {
            let (device, profiles) = match &state.running_pipeline(pipeline.addr())?.active {
                Some(active) => (
                    active.device.clone(),
                    active.streams.iter().map(|(p, _)| *p).collect(),
                ),
                None => return Err(Fault::sequence("pipeline is not started")),
            };
            Ok(Raw::from_addr(
                state.insert(Object::PipelineProfile { device, profiles }),
            ))
        })
    }

    fn delete_pipeline_profile(&self, profile: RawPipelineProfile) {
        self.release(profile.addr(), ObjectKind::PipelineProfile);
    }

    fn pipeline_profile_streams(
        &self,
        profile: RawPipelineProfile,
        error: ErrorOut<'_>,
    ) -> Option<RawStreamProfileList> {
        self.call("pipeline_profile_streams", error, |state| {
            let profiles = state.pipeline_profile(profile.addr())?.1.clone();
            Ok(Raw::from_addr(state.insert(Object::StreamProfileList(profiles))))
        })
    }

    fn pipeline_profile_device(
        &self,
        profile: RawPipelineProfile,
        error: ErrorOut<'_>,
    ) -> Option<RawDevice> {
        self.call("pipeline_profile_device", error, |state| {
            let serial = state.pipeline_profile(profile.addr())?.0.to_owned();
            if !state.devices.iter().any(|d| d.serial == serial) {
                return Err(Fault::disconnected(&serial));
            }
            Ok(Raw::from_addr(state.insert(Object::Device(serial))))
        })
    }

    fn log_to_callback(
        &self,
        min_severity: LogSeverity,
        callback: Box<dyn LogCallback>,
        error: ErrorOut<'_>,
    ) {
        let previous = self.call("log_to_callback", error, |state| {
            Ok(state.logger.replace((min_severity, Arc::from(callback))))
        });
        drop(previous);
    }
}
