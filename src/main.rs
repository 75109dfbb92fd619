use hwcodec::codec::{AccessUnit, ComponentTarget, InputData, Notification, StreamResult};
use hwcodec::common::{
    banner::{BannerInfo, print_banner},
    logger,
    types::AnyResult,
};
use hwcodec::configs::Config;
use hwcodec::hardware::LoopbackUnit;
use hwcodec::surface::{BoxedSurface, MemorySurface};
use tracing::{debug, error, info, warn};

#[tokio::main]
async fn main() -> AnyResult<()> {
    let config = Config::load()?;
    logger::init(&config);

    let session = config.session.clone();
    let component = session.component.as_deref().unwrap_or("any");
    print_banner(&BannerInfo::default(), component, &session.format.mime);

    let (notify_tx, notify_rx) = flume::unbounded();
    let unit = LoopbackUnit::new(session.loopback.clone());
    let (handle, engine_thread) =
        hwcodec::codec::spawn_engine(Box::new(unit), config.engine.clone(), notify_tx)?;

    let surface = session
        .use_surface
        .then(|| Box::new(MemorySurface::new(2)) as BoxedSurface);
    let target = match &session.component {
        Some(name) => ComponentTarget::Named(name.clone()),
        None => ComponentTarget::ByMime {
            mime: session.format.mime.clone(),
            encoder: session.format.encoder,
        },
    };
    handle.setup(target, &session.format, surface, session.auto_run)?;
    if !session.auto_run {
        handle.start()?;
    }

    let mut fed = 0usize;
    let mut drained = 0usize;
    loop {
        tokio::select! {
            note = notify_rx.recv_async() => {
                let Ok(note) = note else {
                    warn!("engine stopped before shutting down");
                    break;
                };
                match serde_json::to_string(&note) {
                    Ok(json) => debug!("notification {}", json),
                    Err(e) => warn!("could not encode {}: {}", note.name(), e),
                }

                match note {
                    Notification::FillThisBuffer { id, .. } => {
                        let input = if fed >= session.access_units {
                            InputData::Exhausted(StreamResult::EndOfStream)
                        } else {
                            let data = vec![(fed & 0xff) as u8; session.access_unit_size];
                            let mut au = AccessUnit::new(data, fed as i64 * session.frame_duration_us);
                            if fed + 1 == session.access_units {
                                au = au.with_eos();
                            }
                            fed += 1;
                            InputData::AccessUnit(au)
                        };
                        handle.submit_input(id, input)?;
                    }
                    Notification::DrainThisBuffer { id, size, timestamp_us, .. } => {
                        drained += 1;
                        debug!("drained {} ({} bytes, t={}us)", id, size, timestamp_us);
                        handle.release_output(id, session.use_surface)?;
                    }
                    Notification::EndOfStream { result } => {
                        info!("end of stream ({:?}) after {} access units", result, fed);
                        handle.shutdown(false)?;
                    }
                    Notification::Error { code, detail } => {
                        error!("engine error {:?}: {}", code, detail);
                        if handle.shutdown(false).is_err() {
                            break;
                        }
                    }
                    Notification::ShutdownCompleted => break,
                    _ => {}
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("interrupted, shutting down");
                handle.shutdown(false)?;
            }
        }
    }

    info!("fed {} access units, drained {} buffers", fed, drained);
    drop(handle);
    if engine_thread.join().is_err() {
        error!("engine thread panicked");
    }
    Ok(())
}
