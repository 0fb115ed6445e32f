#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use rsbridge_sys::sim::SimSdk;
    use rsbridge_sys::ExceptionType;

    use crate::log::*;
    use crate::Error;

    type Lines = Arc<Mutex<Vec<(LogSeverity, String)>>>;

    struct Recorder(Lines);

    impl LogHandler for Recorder {
        fn handle(&self, severity: LogSeverity, message: &str) {
            self.0.lock().unwrap().push((severity, message.to_owned()));
        }
    }

    #[test]
    fn test_log_to_callback_respects_threshold() {
        let _ = env_logger::builder().is_test(true).try_init();
        let sim = SimSdk::new();
        let host = Host::new(sim.clone());
        let lines = Lines::default();

        host.log_to_callback(LogSeverity::Warn, Box::new(Recorder(lines.clone())))
            .unwrap();
        sim.log(LogSeverity::Info, "quiet");
        sim.log(LogSeverity::Warn, "temperature high");
        sim.log(LogSeverity::Fatal, "device lost");

        assert_eq!(
            *lines.lock().unwrap(),
            [
                (LogSeverity::Warn, "temperature high".to_owned()),
                (LogSeverity::Fatal, "device lost".to_owned()),
            ]
        );
    }

    #[test]
    fn test_log_to_rust_replaces_the_handler() {
        let _ = env_logger::builder().is_test(true).try_init();
        let sim = SimSdk::new();
        let host = Host::new(sim.clone());
        let lines = Lines::default();

        host.log_to_callback(LogSeverity::Debug, Box::new(Recorder(lines.clone())))
            .unwrap();
        host.log_to_rust(LogSeverity::Debug).unwrap();
        sim.log(LogSeverity::Error, "to the log crate");
        assert!(lines.lock().unwrap().is_empty());
    }

    #[test]
    fn test_failed_registration() {
        let _ = env_logger::builder().is_test(true).try_init();
        let sim = SimSdk::new();
        let host = Host::new(sim.clone());

        sim.fail_next("log_to_callback", ExceptionType::NotImplemented, "no logger");
        assert!(matches!(
            host.log_to_rust(LogSeverity::Info),
            Err(Error::Native(_))
        ));
        assert_eq!(host.error().unwrap().native_function(), "log_to_callback");
    }
}
