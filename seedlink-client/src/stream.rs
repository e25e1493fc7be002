use futures_core::Stream;

use crate::SeedLinkClient;
use crate::error::ClientError;
use crate::state::OwnedFrame;

/// Convert a streaming [`SeedLinkClient`] into a [`Stream`] of frames.
///
/// The client must be in the `Streaming` state (i.e., after calling
/// [`end_stream()`](SeedLinkClient::end_stream) or [`fetch()`](SeedLinkClient::fetch)).
///
/// The stream yields `Ok(OwnedFrame)` for each received frame and terminates
/// with `None` when the server closes the connection (EOF).
pub fn frame_stream(
    mut client: SeedLinkClient,
) -> impl Stream<Item = Result<OwnedFrame, ClientError>> {
    async_stream::try_stream! {
        while let Some(frame) = client.next_frame().await? {
            yield frame;
        }
    }
}
