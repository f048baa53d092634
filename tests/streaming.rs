mod common;

use std::io::Cursor;
use tinyinfer::model::{Model, ModelBinary};
use tinyinfer::profiler::ProfileConfig;
use tinyinfer::stream::{
    host_session_bytes, parse_device_transcript, HostLink, LinkDatasetHeader, LoopbackLink,
    QueueInterface, Stream, StreamResult, StreamStep,
};
use tinyinfer::MlError;

/// Outputs of `run_sequence` on each window, starting from zero state.
fn window_outputs(binary: &ModelBinary, frames: &[i16], window: usize, size: usize) -> Vec<StreamResult<i16>> {
    frames
        .chunks_exact(window * size)
        .map(|chunk| {
            let mut model = Model::<i16>::init(binary, None).unwrap();
            model.run_sequence(chunk).unwrap();
            StreamResult {
                output: model.output().to_vec(),
                q_fraction_bits: model.output_q_fraction_bits(),
            }
        })
        .collect()
}

#[test]
fn queue_stream_matches_run_sequence() {
    let bytes = common::recurrent_bytes();
    let binary = ModelBinary::from_slice(&bytes);
    let frames = common::recurrent_frames(12, 2);

    let mut queue = QueueInterface::<i16>::new();
    queue.push_frames(&frames, 2);
    queue.close_input();

    let mut stream = Stream::<i16, _>::init(queue, ProfileConfig::ENABLE_MODEL, &binary).unwrap();
    let summary = stream.run().unwrap();
    assert_eq!(summary.frames, 12);
    assert_eq!(summary.outputs, 3);
    assert_eq!(summary.profile.frames, 12);

    let (queue, _) = stream.deinit();
    assert!(!queue.is_open());
    assert_eq!(queue.results(), window_outputs(&binary, &frames, 4, 2).as_slice());
}

#[test]
fn queue_stream_steps() {
    let bytes = common::classifier_bytes();
    let binary = ModelBinary::from_slice(&bytes);

    let mut stream = Stream::<i8, _>::init(QueueInterface::<i8>::new(), ProfileConfig::DISABLE, &binary).unwrap();
    assert_eq!(stream.task().unwrap(), StreamStep::Idle);

    stream.interface_mut().push_frame(&[10, 20, 30, 40]);
    assert_eq!(stream.task().unwrap(), StreamStep::Output);
    assert_eq!(stream.interface().results().len(), 1);

    stream.interface_mut().close_input();
    assert_eq!(stream.task().unwrap(), StreamStep::Finished);
    assert!(stream.is_finished());
    // Finished is sticky
    assert_eq!(stream.task().unwrap(), StreamStep::Finished);
}

#[test]
fn queue_announces_input_q() {
    let bytes = common::classifier_bytes();
    let binary = ModelBinary::from_slice(&bytes);
    let queue = QueueInterface::<i8>::new().with_input_q(4);
    let stream = Stream::<i8, _>::init(queue, ProfileConfig::DISABLE, &binary).unwrap();
    assert_eq!(stream.model().input_q_fraction_bits(), 4);
}

#[test]
fn host_link_session_over_loopback() {
    let bytes = common::recurrent_bytes();
    let binary = ModelBinary::from_slice(&bytes);
    let frames = common::recurrent_frames(8, 2);

    let incoming = host_session_bytes(&frames, 2, 12).unwrap();
    let link = HostLink::new(LoopbackLink::new(incoming));
    let mut stream = Stream::<i16, _>::init(link, ProfileConfig::ENABLE_MODEL, &binary).unwrap();
    let summary = stream.run().unwrap();
    assert_eq!(summary.outputs, 2);

    let (link, _) = stream.deinit();
    let header = link.dataset_header().unwrap();
    assert_eq!(header.n_ex, 8);
    let loopback = link.into_inner();
    let transcript = parse_device_transcript::<i16>(loopback.sent(), 2).unwrap();

    assert_eq!(transcript.info.n_out_classes, 2);
    assert_eq!(transcript.info.recurrent_ts_size, 4);
    assert_eq!(transcript.info.persistent_mem, 3 * 8);
    assert_eq!(transcript.info.model_sz as usize, bytes.len());
    assert_eq!(transcript.frame_requests, 8);
    assert_eq!(transcript.results, window_outputs(&binary, &frames, 4, 2));
}

#[test]
fn host_link_rejects_wrong_frame_size() {
    let bytes = common::recurrent_bytes();
    let binary = ModelBinary::from_slice(&bytes);
    let frames = common::recurrent_frames(3, 3);

    let incoming = host_session_bytes(&frames, 3, 12).unwrap();
    let link = HostLink::new(LoopbackLink::new(incoming));
    let err = Stream::<i16, _>::init(link, ProfileConfig::DISABLE, &binary).err().unwrap();
    assert!(matches!(err, MlError::InvalidArgument(_)));
}

#[test]
fn host_link_truncated_frame_is_a_communication_error() {
    let bytes = common::classifier_bytes();
    let binary = ModelBinary::from_slice(&bytes);

    let mut incoming = host_session_bytes(&[1i8, 2, 3, 4, 5, 6, 7, 8], 4, 6).unwrap();
    // Drop ML_COMPLETED and half of the last frame
    incoming.truncate(incoming.len() - "ML_COMPLETED\0".len() - 2);
    let link = HostLink::new(LoopbackLink::new(incoming));
    let mut stream = Stream::<i8, _>::init(link, ProfileConfig::DISABLE, &binary).unwrap();
    assert_eq!(stream.task().unwrap(), StreamStep::Output);
    assert!(matches!(stream.task(), Err(MlError::Communication(_))));
}

#[test]
fn dataset_header_layout() {
    let header = LinkDatasetHeader {
        n_ex: 3,
        in_sz: 4,
        q_fixed: 7,
        input_size: 1,
        output_size: 1,
        baud_rate: 115_200,
    };
    let mut buf = Vec::new();
    header.write_to(&mut buf).unwrap();
    assert_eq!(buf.len(), LinkDatasetHeader::SIZE);
    assert_eq!(&buf[8..12], &7i32.to_le_bytes());
    assert_eq!(LinkDatasetHeader::read_from(&mut Cursor::new(buf)).unwrap(), header);
}
