use std::future::Future;

/// Drives every future to completion and returns their outputs in input order. A failing branch
/// never cancels its siblings; errors come back in their own slot.
pub async fn settle<I>(futures: I) -> Vec<<I::Item as Future>::Output>
where
	I: IntoIterator,
	I::Item: Future,
{
	futures::future::join_all(futures).await
}
