//! Page-numbered draining of remote collections.

use std::future::Future;

use onefocus_storage::ApiError;
use serde_json::Value as JsonValue;
use tracing::debug;

use crate::api::WorkspaceApi;
use crate::types::TasksPage;

/// Hard ceiling on pages requested for one list.
pub const MAX_TASK_PAGES: u32 = 10_000;

#[derive(Debug, Clone, PartialEq)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub last_page: Option<bool>,
}

impl From<TasksPage> for Page<JsonValue> {
    fn from(page: TasksPage) -> Self {
        Page {
            items: page.tasks,
            last_page: page.last_page,
        }
    }
}

/// Requests pages 0, 1, 2, … in order until a page says it is the last one or
/// comes back empty. Fails with [`ApiError::PaginationRunaway`] after `max_pages`.
pub async fn fetch_all_pages<T, F, Fut>(
    resource: &str,
    max_pages: u32,
    mut fetch: F,
) -> Result<Vec<T>, ApiError>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<Page<T>, ApiError>>,
{
    let mut all = Vec::new();
    for page in 0..max_pages {
        let Page { items, last_page } = fetch(page).await?;
        let empty = items.is_empty();
        all.extend(items);
        debug!(resource, page, fetched = all.len(), "fetched page");
        if last_page == Some(true) || empty {
            return Ok(all);
        }
    }
    Err(ApiError::PaginationRunaway {
        resource: resource.to_string(),
        pages: max_pages,
    })
}

/// Every raw task of one list, in remote order.
pub async fn fetch_all_tasks(
    api: &dyn WorkspaceApi,
    list_id: &str,
) -> Result<Vec<JsonValue>, ApiError> {
    let resource = format!("list {list_id} tasks");
    fetch_all_pages(&resource, MAX_TASK_PAGES, |page| async move {
        api.tasks_page(list_id, page).await.map(Page::from)
    })
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use onefocus_core::ErrorKind;
    use std::cell::RefCell;

    fn page(items: &[u32], last_page: Option<bool>) -> Result<Page<u32>, ApiError> {
        Ok(Page {
            items: items.to_vec(),
            last_page,
        })
    }

    #[tokio::test]
    async fn stops_on_last_page_flag_and_keeps_order() {
        let requested = RefCell::new(Vec::new());
        let all = fetch_all_pages("numbers", 100, |n| {
            requested.borrow_mut().push(n);
            async move {
                match n {
                    0 => page(&[1, 2], Some(false)),
                    1 => page(&[3], Some(false)),
                    _ => page(&[4, 5], Some(true)),
                }
            }
        })
        .await
        .unwrap();

        assert_eq!(all, vec![1, 2, 3, 4, 5]);
        assert_eq!(*requested.borrow(), vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn stops_on_first_empty_page_without_flag() {
        let requested = RefCell::new(0u32);
        let all = fetch_all_pages("numbers", 100, |n| {
            *requested.borrow_mut() += 1;
            async move {
                if n < 2 {
                    page(&[n], None)
                } else {
                    page(&[], None)
                }
            }
        })
        .await
        .unwrap();

        assert_eq!(all, vec![0, 1]);
        assert_eq!(*requested.borrow(), 3);
    }

    #[tokio::test]
    async fn never_ending_remote_hits_the_ceiling() {
        let err = fetch_all_pages("numbers", 25, |n| async move { page(&[n], Some(false)) })
            .await
            .unwrap_err();

        assert!(matches!(err, ApiError::PaginationRunaway { pages: 25, .. }));
        assert_eq!(err.kind(), ErrorKind::FatalPrecondition);
    }

    #[tokio::test]
    async fn page_errors_propagate() {
        let err = fetch_all_pages("numbers", 10, |_| async {
            Err::<Page<u32>, _>(ApiError::Precondition("boom".to_string()))
        })
        .await
        .unwrap_err();
        assert!(matches!(err, ApiError::Precondition(_)));
    }
}
