use std::collections::{HashMap, VecDeque};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::thread::JoinHandle;

use log::error;

use crate::{
    DevicesChangedCallback, ExceptionType, Extension, FrameCallback, FrameMetadata, Format,
    LogCallback, LogSeverity, NotificationCategory, NotificationsCallback, ProcessingBlockKind,
    Stream, StreamProfileData, TimestampDomain,
};

/// The kinds of objects the simulated SDK hands out handles for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObjectKind {
    Context,
    DeviceList,
    Device,
    SensorList,
    Sensor,
    StreamProfileList,
    StreamProfile,
    Frame,
    FrameQueue,
    ProcessingBlock,
    Pipeline,
    PipelineProfile,
    Notification,
    Error,
}

/// A simulated device.
#[derive(Debug, Clone)]
pub struct DeviceSpec {
    pub name: String,
    pub serial: String,
    pub firmware_version: String,
    pub product_id: String,
    pub sensors: Vec<SensorSpec>,
}

impl DeviceSpec {
    /// A stereo depth camera with a depth/infrared module and an RGB module.
    pub fn depth_camera(serial: &str) -> Self {
        let video = |stream, format, index, unique_id, fps, width, height| StreamProfileData {
            stream,
            format,
            index,
            unique_id,
            fps,
            width,
            height,
        };

        DeviceSpec {
            name: "Simulated Depth Camera D435".to_owned(),
            serial: serial.to_owned(),
            firmware_version: "5.13.0.50".to_owned(),
            product_id: "0B07".to_owned(),
            sensors: vec![
                SensorSpec {
                    name: "Stereo Module".to_owned(),
                    profiles: vec![
                        video(Stream::Depth, Format::Z16, 0, 1, 30, 640, 480),
                        video(Stream::Depth, Format::Z16, 0, 2, 15, 1280, 720),
                        video(Stream::Infrared, Format::Y8, 1, 3, 30, 640, 480),
                    ],
                    depth_units: 0.001,
                },
                SensorSpec {
                    name: "RGB Camera".to_owned(),
                    profiles: vec![
                        video(Stream::Color, Format::Rgb8, 0, 4, 30, 640, 480),
                        video(Stream::Color, Format::Bgr8, 0, 5, 30, 640, 480),
                    ],
                    depth_units: 0.0,
                },
            ],
        }
    }
}

/// A simulated sensor.
#[derive(Debug, Clone)]
pub struct SensorSpec {
    pub name: String,
    pub profiles: Vec<StreamProfileData>,
    /// Metres per depth unit; zero for sensors without depth.
    pub depth_units: f32,
}

/// A notification raised through [`SimSdk::notify`](super::SimSdk::notify).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NotificationSpec {
    pub description: String,
    pub timestamp: f64,
    pub severity: LogSeverity,
    pub category: NotificationCategory,
    pub serialized_data: String,
}

/// A synthetic frame made with [`SimSdk::create_frame`](super::SimSdk::create_frame).
#[derive(Debug, Clone, Copy, Default)]
pub struct FrameSpec {
    pub profile: StreamProfileData,
    pub number: u64,
    pub depth_units: f32,
}

impl FrameSpec {
    pub fn depth(width: i32, height: i32, number: u64) -> Self {
        FrameSpec {
            profile: StreamProfileData {
                stream: Stream::Depth,
                format: Format::Z16,
                fps: 30,
                width,
                height,
                ..Default::default()
            },
            number,
            depth_units: 0.001,
        }
    }

    pub fn color(width: i32, height: i32, number: u64) -> Self {
        FrameSpec {
            profile: StreamProfileData {
                stream: Stream::Color,
                format: Format::Rgb8,
                fps: 30,
                width,
                height,
                ..Default::default()
            },
            number,
            depth_units: 0.0,
        }
    }
}

#[derive(Debug)]
pub(super) struct SimFrame {
    pub width: i32,
    pub height: i32,
    pub stride: i32,
    pub bits_per_pixel: i32,
    pub data: Arc<[u8]>,
    pub timestamp: f64,
    pub domain: TimestampDomain,
    pub number: u64,
    pub extensions: Vec<Extension>,
    pub profile: StreamProfileData,
    pub metadata: Vec<(FrameMetadata, i64)>,
    pub depth_units: f32,
    /// Frames bundled in a frame set, one reference each.
    pub embedded: Vec<usize>,
}

impl SimFrame {
    /// Builds a frame whose every byte is the low byte of `spec.number`.
    pub fn synthesize(spec: FrameSpec) -> Self {
        let profile = spec.profile;
        let bits_per_pixel = profile.format.bits_per_pixel();
        let stride = profile.width * bits_per_pixel / 8;
        let len = match profile.stream {
            Stream::Gyro | Stream::Accel => 12,
            Stream::Pose => 80,
            _ => (stride * profile.height).max(0) as usize,
        };
        let data = vec![spec.number as u8; len];
        let timestamp = if profile.fps > 0 {
            spec.number as f64 * 1000.0 / f64::from(profile.fps)
        } else {
            0.0
        };

        SimFrame {
            width: profile.width,
            height: profile.height,
            stride,
            bits_per_pixel,
            data: data.into(),
            timestamp,
            domain: TimestampDomain::HardwareClock,
            number: spec.number,
            extensions: extensions_of(profile.stream),
            profile,
            metadata: vec![
                (FrameMetadata::FrameCounter, spec.number as i64),
                (FrameMetadata::FrameTimestamp, timestamp as i64),
                (FrameMetadata::ActualFps, i64::from(profile.fps)),
            ],
            depth_units: spec.depth_units,
            embedded: Vec::new(),
        }
    }

    /// Bundles `embedded` into a frame set, taking over one reference to each.
    pub fn composite(number: u64, timestamp: f64, embedded: Vec<usize>) -> Self {
        SimFrame {
            width: 0,
            height: 0,
            stride: 0,
            bits_per_pixel: 0,
            data: Arc::from(Vec::<u8>::new()),
            timestamp,
            domain: TimestampDomain::HardwareClock,
            number,
            extensions: vec![Extension::CompositeFrame],
            profile: StreamProfileData::default(),
            metadata: vec![(FrameMetadata::FrameCounter, number as i64)],
            depth_units: 0.0,
            embedded,
        }
    }

    /// Derives a new frame with different pixel data and profile, keeping the timing.
    pub fn derive(&self, profile: StreamProfileData, stride: i32, data: Vec<u8>) -> Self {
        SimFrame {
            width: profile.width,
            height: profile.height,
            stride,
            bits_per_pixel: profile.format.bits_per_pixel(),
            data: data.into(),
            timestamp: self.timestamp,
            domain: self.domain,
            number: self.number,
            extensions: extensions_of(profile.stream),
            profile,
            metadata: self.metadata.clone(),
            depth_units: self.depth_units,
            embedded: Vec::new(),
        }
    }

    pub fn has(&self, extension: Extension) -> bool {
        self.extensions.contains(&extension)
    }
}

fn extensions_of(stream: Stream) -> Vec<Extension> {
    match stream {
        Stream::Depth => vec![Extension::VideoFrame, Extension::DepthFrame],
        Stream::Color | Stream::Infrared => vec![Extension::VideoFrame],
        Stream::Gyro | Stream::Accel => vec![Extension::MotionFrame],
        Stream::Pose => vec![Extension::PoseFrame],
        Stream::Any => Vec::new(),
    }
}

pub(super) type SensorKey = (String, usize);

pub(super) struct QueueState {
    pub capacity: usize,
    pub frames: VecDeque<usize>,
}

/// Frame sets a pipeline keeps before the oldest is dropped.
pub(super) const PIPELINE_QUEUE_SIZE: usize = 1;

pub(super) struct ActivePipeline {
    pub device: String,
    /// The profile streamed from each sensor, with its depth units.
    pub streams: Vec<(StreamProfileData, f32)>,
    pub counter: u64,
}

pub(super) struct PipelineState {
    pub context: usize,
    pub active: Option<ActivePipeline>,
    pub frames: VecDeque<usize>,
    pub streamer: Option<Streamer>,
}

impl PipelineState {
    pub fn new(context: usize) -> Self {
        PipelineState {
            context,
            active: None,
            frames: VecDeque::new(),
            streamer: None,
        }
    }
}

pub(super) enum Object {
    Context {
        devices_changed: Option<Arc<dyn DevicesChangedCallback>>,
    },
    DeviceList(Vec<String>),
    Device(String),
    SensorList(Vec<SensorKey>),
    Sensor(SensorKey),
    StreamProfileList(Vec<StreamProfileData>),
    StreamProfile(StreamProfileData),
    Frame {
        refs: u32,
        frame: Arc<SimFrame>,
    },
    FrameQueue(QueueState),
    ProcessingBlock {
        kind: ProcessingBlockKind,
        output: Option<usize>,
    },
    Pipeline(PipelineState),
    PipelineProfile {
        device: String,
        profiles: Vec<StreamProfileData>,
    },
    Notification(NotificationSpec),
    Error {
        function: String,
        message: String,
        exception: ExceptionType,
    },
}

impl Object {
    pub fn kind(&self) -> ObjectKind {
        match self {
            Object::Context { .. } => ObjectKind::Context,
            Object::DeviceList(_) => ObjectKind::DeviceList,
            Object::Device(_) => ObjectKind::Device,
            Object::SensorList(_) => ObjectKind::SensorList,
            Object::Sensor(_) => ObjectKind::Sensor,
            Object::StreamProfileList(_) => ObjectKind::StreamProfileList,
            Object::StreamProfile(_) => ObjectKind::StreamProfile,
            Object::Frame { .. } => ObjectKind::Frame,
            Object::FrameQueue(_) => ObjectKind::FrameQueue,
            Object::ProcessingBlock { .. } => ObjectKind::ProcessingBlock,
            Object::Pipeline(_) => ObjectKind::Pipeline,
            Object::PipelineProfile { .. } => ObjectKind::PipelineProfile,
            Object::Notification(_) => ObjectKind::Notification,
            Object::Error { .. } => ObjectKind::Error,
        }
    }
}

/// Why a simulated call failed.
#[derive(Debug, Clone)]
pub(super) struct Fault {
    pub exception: ExceptionType,
    pub message: String,
}

impl Fault {
    pub fn new(exception: ExceptionType, message: impl Into<String>) -> Self {
        Fault {
            exception,
            message: message.into(),
        }
    }

    pub fn invalid(what: &str) -> Self {
        Fault::new(ExceptionType::InvalidValue, format!("invalid {what} handle"))
    }

    pub fn sequence(message: impl Into<String>) -> Self {
        Fault::new(ExceptionType::WrongApiCallSequence, message)
    }

    pub fn disconnected(serial: &str) -> Self {
        Fault::new(
            ExceptionType::CameraDisconnected,
            format!("device {serial} is disconnected"),
        )
    }
}

pub(super) type SimResult<T> = Result<T, Fault>;

pub(super) struct Streamer {
    pub stop: Arc<AtomicBool>,
    pub thread: JoinHandle<()>,
}

pub(super) struct SensorState {
    pub spec: SensorSpec,
    pub opened: Vec<StreamProfileData>,
    pub frames: Option<Arc<dyn FrameCallback>>,
    pub notifications: Option<Arc<dyn NotificationsCallback>>,
    pub streamer: Option<Streamer>,
    pub counter: u64,
}

impl SensorState {
    pub fn new(spec: SensorSpec) -> Self {
        SensorState {
            spec,
            opened: Vec::new(),
            frames: None,
            notifications: None,
            streamer: None,
            counter: 0,
        }
    }
}

pub(super) struct State {
    pub objects: HashMap<usize, Object>,
    next_addr: usize,
    pub devices: Vec<DeviceSpec>,
    pub sensors: HashMap<SensorKey, SensorState>,
    pub failures: HashMap<String, Fault>,
    pub invalid_releases: u64,
    pub orphaned_frames: u64,
    pub logger: Option<(LogSeverity, Arc<dyn LogCallback>)>,
    pub auto_stream: bool,
}

impl State {
    pub fn new() -> Self {
        State {
            objects: HashMap::new(),
            next_addr: 0x1000,
            devices: Vec::new(),
            sensors: HashMap::new(),
            failures: HashMap::new(),
            invalid_releases: 0,
            orphaned_frames: 0,
            logger: None,
            auto_stream: true,
        }
    }

    pub fn insert(&mut self, object: Object) -> usize {
        self.next_addr += 0x10;
        self.objects.insert(self.next_addr, object);
        self.next_addr
    }

    /// Allocates an error object for `fault` and returns its address.
    pub fn raise(&mut self, function: &str, fault: Fault) -> usize {
        self.insert(Object::Error {
            function: function.to_owned(),
            message: fault.message,
            exception: fault.exception,
        })
    }

    /// Removes the object at `addr` if it has the expected kind.
    ///
    /// Anything else is a release of a handle that is not live, which is counted.
    pub fn remove(&mut self, addr: usize, kind: ObjectKind) -> Option<Object> {
        match self.objects.get(&addr) {
            Some(object) if object.kind() == kind => self.objects.remove(&addr),
            _ => {
                self.invalid_releases += 1;
                error!("release of a {kind:?} handle that is not live: {addr:#x}");
                None
            }
        }
    }

    /// Drops one reference to a frame, deleting it at zero along with its share of any frames it
    /// bundles.
    pub fn release_frame_ref(&mut self, addr: usize) {
        let last = match self.objects.get_mut(&addr) {
            Some(Object::Frame { refs, .. }) => {
                *refs -= 1;
                *refs == 0
            }
            _ => {
                self.invalid_releases += 1;
                error!("release of a frame that is not live: {addr:#x}");
                return;
            }
        };
        if !last {
            return;
        }
        if let Some(Object::Frame { frame, .. }) = self.objects.remove(&addr) {
            for embedded in frame.embedded.iter().copied() {
                self.release_frame_ref(embedded);
            }
        }
    }

    pub fn live(&self, kind: ObjectKind) -> usize {
        self.objects.values().filter(|o| o.kind() == kind).count()
    }

    pub fn device_list(&self, addr: usize) -> SimResult<&Vec<String>> {
        match self.objects.get(&addr) {
            Some(Object::DeviceList(serials)) => Ok(serials),
            _ => Err(Fault::invalid("device list")),
        }
    }

    pub fn device_serial(&self, addr: usize) -> SimResult<&str> {
        match self.objects.get(&addr) {
            Some(Object::Device(serial)) => Ok(serial),
            _ => Err(Fault::invalid("device")),
        }
    }

    /// Looks up a device handle, failing if the device was unplugged.
    pub fn device(&self, addr: usize) -> SimResult<&DeviceSpec> {
        let serial = self.device_serial(addr)?;
        self.devices
            .iter()
            .find(|d| d.serial == serial)
            .ok_or_else(|| Fault::disconnected(serial))
    }

    pub fn sensor_list(&self, addr: usize) -> SimResult<&Vec<SensorKey>> {
        match self.objects.get(&addr) {
            Some(Object::SensorList(keys)) => Ok(keys),
            _ => Err(Fault::invalid("sensor list")),
        }
    }

    pub fn sensor_key(&self, addr: usize) -> SimResult<SensorKey> {
        match self.objects.get(&addr) {
            Some(Object::Sensor(key)) => Ok(key.clone()),
            _ => Err(Fault::invalid("sensor")),
        }
    }

    /// Looks up a sensor handle, failing if its device was unplugged.
    pub fn sensor(&mut self, addr: usize) -> SimResult<(SensorKey, &mut SensorState)> {
        let key = self.sensor_key(addr)?;
        match self.sensors.get_mut(&key) {
            Some(sensor) => Ok((key, sensor)),
            None => Err(Fault::disconnected(&key.0)),
        }
    }

    pub fn profile_list(&self, addr: usize) -> SimResult<&Vec<StreamProfileData>> {
        match self.objects.get(&addr) {
            Some(Object::StreamProfileList(profiles)) => Ok(profiles),
            _ => Err(Fault::invalid("stream profile list")),
        }
    }

    pub fn profile(&self, addr: usize) -> SimResult<StreamProfileData> {
        match self.objects.get(&addr) {
            Some(Object::StreamProfile(profile)) => Ok(*profile),
            _ => Err(Fault::invalid("stream profile")),
        }
    }

    pub fn frame(&self, addr: usize) -> SimResult<&Arc<SimFrame>> {
        match self.objects.get(&addr) {
            Some(Object::Frame { frame, .. }) => Ok(frame),
            _ => Err(Fault::invalid("frame")),
        }
    }

    pub fn frame_refs_mut(&mut self, addr: usize) -> SimResult<&mut u32> {
        match self.objects.get_mut(&addr) {
            Some(Object::Frame { refs, .. }) => Ok(refs),
            _ => Err(Fault::invalid("frame")),
        }
    }

    pub fn queue(&mut self, addr: usize) -> SimResult<&mut QueueState> {
        match self.objects.get_mut(&addr) {
            Some(Object::FrameQueue(queue)) => Ok(queue),
            _ => Err(Fault::invalid("frame queue")),
        }
    }

    /// Hands one frame reference to a queue, dropping the oldest frame when it is full.
    ///
    /// Returns `false` and releases the reference if the queue is gone.
    pub fn push_frame(&mut self, queue: usize, frame: usize) -> bool {
        let evicted = match self.queue(queue) {
            Ok(queue) => {
                let evicted = if queue.frames.len() >= queue.capacity {
                    queue.frames.pop_front()
                } else {
                    None
                };
                queue.frames.push_back(frame);
                evicted
            }
            Err(_) => {
                self.orphaned_frames += 1;
                self.release_frame_ref(frame);
                return false;
            }
        };
        if let Some(evicted) = evicted {
            self.release_frame_ref(evicted);
        }
        true
    }

    pub fn block(&mut self, addr: usize) -> SimResult<(ProcessingBlockKind, &mut Option<usize>)> {
        match self.objects.get_mut(&addr) {
            Some(Object::ProcessingBlock { kind, output }) => Ok((*kind, output)),
            _ => Err(Fault::invalid("processing block")),
        }
    }

    pub fn pipeline(&mut self, addr: usize) -> SimResult<&mut PipelineState> {
        match self.objects.get_mut(&addr) {
            Some(Object::Pipeline(pipeline)) => Ok(pipeline),
            _ => Err(Fault::invalid("pipeline")),
        }
    }

    /// The active pipeline at `addr`, failing if it was never started.
    pub fn running_pipeline(&mut self, addr: usize) -> SimResult<&mut PipelineState> {
        let pipeline = self.pipeline(addr)?;
        if pipeline.active.is_none() {
            return Err(Fault::sequence("pipeline is not started"));
        }
        Ok(pipeline)
    }

    pub fn pipeline_profile(&self, addr: usize) -> SimResult<(&str, &Vec<StreamProfileData>)> {
        match self.objects.get(&addr) {
            Some(Object::PipelineProfile { device, profiles }) => Ok((device, profiles)),
            _ => Err(Fault::invalid("pipeline profile")),
        }
    }

    /// Synthesizes the next frame set of a running pipeline and queues it.
    ///
    /// Returns `false` if the pipeline is stopped or its device was unplugged.
    pub fn push_frameset(&mut self, pipeline: usize) -> bool {
        let (device, streams, number) = match self.objects.get_mut(&pipeline) {
            Some(Object::Pipeline(PipelineState {
                active: Some(active),
                ..
            })) => {
                active.counter += 1;
                (active.device.clone(), active.streams.clone(), active.counter)
            }
            _ => return false,
        };
        if !self.devices.iter().any(|d| d.serial == device) {
            return false;
        }

        let mut embedded = Vec::with_capacity(streams.len());
        let mut timestamp = 0.0;
        for (profile, depth_units) in streams {
            let frame = SimFrame::synthesize(FrameSpec {
                profile,
                number,
                depth_units,
            });
            timestamp = frame.timestamp;
            embedded.push(self.insert(Object::Frame {
                refs: 1,
                frame: Arc::new(frame),
            }));
        }
        let frameset = self.insert(Object::Frame {
            refs: 1,
            frame: Arc::new(SimFrame::composite(number, timestamp, embedded)),
        });

        let evicted = match self.objects.get_mut(&pipeline) {
            Some(Object::Pipeline(state)) => {
                state.frames.push_back(frameset);
                if state.frames.len() > PIPELINE_QUEUE_SIZE {
                    state.frames.pop_front()
                } else {
                    None
                }
            }
            _ => None,
        };
        if let Some(evicted) = evicted {
            self.release_frame_ref(evicted);
        }
        true
    }

    pub fn notification(&self, addr: usize) -> SimResult<&NotificationSpec> {
        match self.objects.get(&addr) {
            Some(Object::Notification(spec)) => Ok(spec),
            _ => Err(Fault::invalid("notification")),
        }
    }
}
