use std::cmp::Reverse;

use crate::limits::*;
use crate::model::*;

use super::{Engine, EngineError};

/// `propuesta <serviceKind> ha sido '<status>'`
pub fn notice_message(service_kind: &str, status: Status) -> String {
    format!("propuesta {service_kind} ha sido '{status}'")
}

/// Missing or zero values fall back to the defaults.
fn resolve_paging(page: Option<u32>, page_size: Option<u32>) -> Result<(u32, u32), EngineError> {
    let page = page.filter(|&p| p != 0).unwrap_or(DEFAULT_PAGE);
    let page_size = page_size.filter(|&s| s != 0).unwrap_or(DEFAULT_PAGE_SIZE);
    if page_size > MAX_PAGE_SIZE {
        return Err(EngineError::LimitExceeded("page_size too large"));
    }
    Ok((page, page_size))
}

/// Order newest change first and cut one page. Ties on `updated_at` fall back
/// to the higher id so paging is stable.
pub(crate) fn paginate(mut bookings: Vec<Booking>, page: u32, page_size: u32) -> NotificationPage {
    bookings.sort_by_key(|b| Reverse((b.updated_at, b.id)));
    let total_count = bookings.len();
    let size = page_size as usize;
    let offset = (page as usize - 1).saturating_mul(size);
    let items = bookings
        .into_iter()
        .skip(offset)
        .take(size)
        .map(|b| Notification {
            booking_id: b.id,
            message: notice_message(&b.service_kind, b.status),
            service_kind: b.service_kind,
            status: b.status,
            updated_at: b.updated_at,
        })
        .collect();
    NotificationPage {
        items,
        total_count,
        total_pages: total_count.div_ceil(size),
        current_page: page,
        page_size,
    }
}

impl Engine {
    /// Status-change notices for a requester: one per booking that has left
    /// `pending`. Derived on every call; nothing is stored.
    pub async fn list_notifications(
        &self,
        requester_id: u64,
        page: Option<u32>,
        page_size: Option<u32>,
    ) -> Result<NotificationPage, EngineError> {
        let (page, page_size) = resolve_paging(page, page_size)?;
        let changed = self
            .store
            .find_for_requester(requester_id, |b| b.status != Status::Pending)
            .await;
        Ok(paginate(changed, page, page_size))
    }

    /// Acknowledge a notice. Dismissal lives on the client; the server only
    /// confirms the notice exists for this requester.
    pub async fn dismiss_notification(
        &self,
        requester_id: u64,
        booking_id: BookingId,
    ) -> Result<(), EngineError> {
        match self.store.get(booking_id).await {
            Some(b) if b.requester_id == requester_id && b.status != Status::Pending => Ok(()),
            _ => Err(EngineError::NotFound(booking_id)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn changed(id: BookingId, status: Status, updated_at: Ms) -> Booking {
        let mut b = Booking::new(
            id,
            5,
            7,
            0,
            BookingDetails {
                service_kind: "limpieza profunda".into(),
                ..Default::default()
            },
            0,
        );
        b.status = status;
        b.updated_at = updated_at;
        b
    }

    #[test]
    fn message_template() {
        assert_eq!(
            notice_message("limpieza profunda", Status::InProgress),
            "propuesta limpieza profunda ha sido 'in_progress'"
        );
    }

    #[test]
    fn paging_defaults_and_bounds() {
        assert_eq!(resolve_paging(None, None).unwrap(), (1, 10));
        assert_eq!(resolve_paging(Some(3), Some(25)).unwrap(), (3, 25));
        assert_eq!(resolve_paging(Some(0), None).unwrap(), (1, 10));
        assert_eq!(resolve_paging(Some(2), Some(0)).unwrap(), (2, 10));
        assert!(matches!(
            resolve_paging(None, Some(MAX_PAGE_SIZE + 1)),
            Err(EngineError::LimitExceeded(_))
        ));
    }

    #[test]
    fn newest_first_and_page_math() {
        let bookings = (1..=25)
            .map(|i| changed(i, Status::Accepted, 1_000 + i as Ms))
            .collect();
        let page = paginate(bookings, 3, 10);
        assert_eq!(page.total_count, 25);
        assert_eq!(page.total_pages, 3);
        assert_eq!(page.current_page, 3);
        let ids: Vec<_> = page.items.iter().map(|n| n.booking_id).collect();
        assert_eq!(ids, vec![5, 4, 3, 2, 1]);
    }

    #[test]
    fn page_past_the_end_is_empty() {
        let page = paginate(vec![changed(1, Status::Finished, 5)], 2, 10);
        assert!(page.items.is_empty());
        assert_eq!(page.total_count, 1);
        assert_eq!(page.total_pages, 1);
    }

    #[test]
    fn ties_break_on_id() {
        let page = paginate(
            vec![
                changed(1, Status::Accepted, 50),
                changed(2, Status::Finished, 50),
            ],
            1,
            10,
        );
        let ids: Vec<_> = page.items.iter().map(|n| n.booking_id).collect();
        assert_eq!(ids, vec![2, 1]);
        assert_eq!(
            page.items[0].message,
            "propuesta limpieza profunda ha sido 'finished'"
        );
    }
}
