//! One-shot dual-channel acquisition: settings caching, sample retrieval, Vp-p scaling.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use log::warn;

use crate::error::{OscilokError, Result};
use crate::settings::Settings;
use crate::transport::{Transport, CHANNEL_NONE};
use crate::waveform::{self, Wave};

const CACHE_MIN_LEN: usize = 3200;
const CACHE_TIME: Duration = Duration::from_millis(3500);
const CACHE_RECENT: Duration = Duration::from_millis(1800);
const SETTLE_DELAY: Duration = Duration::from_millis(100);

/// Abstracts dual-channel acquisition over the real USB transport so the
/// Polling Controller can be driven against a fake in tests.
#[async_trait]
pub trait DualChannelSource: Send {
    async fn dual(&mut self) -> Result<(Wave, Wave)>;
    async fn close(&mut self);
}

struct CacheEntry {
    data: Vec<u8>,
    at: Instant,
}

#[derive(Default)]
struct SampleCache {
    channels: [Option<CacheEntry>; 2],
}

impl SampleCache {
    fn get_recent(&self, channel: usize) -> Option<&[u8]> {
        let entry = self.channels[channel].as_ref()?;
        if entry.at.elapsed() < CACHE_RECENT {
            Some(&entry.data)
        } else {
            None
        }
    }

    fn store(&mut self, channel: usize, data: Vec<u8>) {
        if data.len() < CACHE_MIN_LEN {
            return;
        }
        self.channels[channel] = Some(CacheEntry {
            data,
            at: Instant::now(),
        });
    }

    fn evict_stale(&mut self) {
        for slot in self.channels.iter_mut() {
            if let Some(entry) = slot
                && entry.at.elapsed() >= CACHE_TIME
            {
                *slot = None;
            }
        }
    }
}

/// Drives the real DSO over USB.
pub struct Scope {
    transport: Transport,
    settings: Option<Settings>,
    cache: SampleCache,
}

impl Scope {
    pub async fn open() -> Result<Scope> {
        let transport = Transport::open().await?;
        Ok(Scope {
            transport,
            settings: None,
            cache: SampleCache::default(),
        })
    }

    async fn ensure_settings(&mut self) -> Result<()> {
        if self.settings.is_some() {
            return Ok(());
        }
        self.transport.request_settings().await?;
        let raw = self.transport.get_settings().await?;
        if raw.len() == crate::settings::SETTINGS_LEN {
            self.settings = Some(Settings::decode(&raw)?);
        }
        tokio::time::sleep(SETTLE_DELAY).await;
        Ok(())
    }

    /// Returns the channel's raw sample bytes plus whether the returned
    /// channel (after the one allowed retry) actually matches `channel`.
    async fn read_channel(&mut self, channel: u8) -> Result<(Vec<u8>, bool)> {
        self.cache.evict_stale();
        let idx = channel as usize - 1;
        if let Some(cached) = self.cache.get_recent(idx) {
            return Ok((cached.to_vec(), true));
        }

        self.transport.sample(channel - 1).await?;
        let (mut data, mut got_channel) = self.transport.get_sample().await?;
        if got_channel != CHANNEL_NONE && got_channel != (channel - 1) as i32 {
            warn!(
                "channel mismatch: requested {} got {}, retrying once",
                channel - 1,
                got_channel
            );
            let (retry_data, retry_channel) = self.transport.get_sample().await?;
            got_channel = retry_channel;
            if retry_channel == (channel - 1) as i32 {
                data = retry_data;
            } else {
                warn!("channel still mismatched after retry, keeping data anyway");
            }
        }
        if data.is_empty() {
            return Err(OscilokError::SampleLost);
        }

        let matched = got_channel == (channel - 1) as i32;
        self.cache.store(idx, data.clone());
        Ok((data, matched))
    }

    async fn read(&mut self, channel: u8) -> Result<Wave> {
        self.ensure_settings().await?;
        let (data, matched) = self.read_channel(channel).await?;
        let mut wave = waveform::get_wave_form(&data);

        if matched && let Some(settings) = &self.settings {
            let channel_settings = if channel == 1 { &settings.ch1 } else { &settings.ch2 };
            let vpp = (wave.p2p as f64 * channel_settings.multiplier * 10000.0).round() / 10000.0;
            wave.vpp = Some(vpp);
        }

        Ok(wave)
    }
}

#[async_trait]
impl DualChannelSource for Scope {
    async fn dual(&mut self) -> Result<(Wave, Wave)> {
        let ch1 = self.read(1).await?;
        let ch2 = self.read(2).await?;
        Ok((ch1, ch2))
    }

    async fn close(&mut self) {
        self.transport.close().await;
        self.settings = None;
    }
}
