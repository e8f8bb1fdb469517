use std::sync::Arc;

use wellpoint::{
    application::{
        Authenticator, BookingService, Catalog, FavoriteService, ListingService, PaymentService,
        ProfileService, RatingService, Store,
    },
    domain::payment::PaymentGateway,
    Booking, MediaLimits, Stripe,
};

/// Services shared by the handlers.
#[derive(Clone)]
pub struct AppState {
    pub authenticator: Arc<dyn Authenticator>,
    pub profiles: ProfileService,
    pub listings: ListingService,
    pub bookings: BookingService,
    pub favorites: FavoriteService,
    pub ratings: RatingService,
    pub payments: PaymentService,
    pub media_max_bytes: usize,
}

impl AppState {
    pub fn new(
        store: Store,
        catalog: Arc<dyn Catalog>,
        authenticator: Arc<dyn Authenticator>,
        gateway: Arc<dyn PaymentGateway>,
        stripe: &Stripe,
        booking: &Booking,
        media: &MediaLimits,
    ) -> Self {
        Self {
            authenticator,
            profiles: ProfileService::new(store.clone(), media.max_bytes),
            listings: ListingService::new(store.clone(), catalog.clone(), media.max_bytes),
            bookings: BookingService::new(
                store.clone(),
                catalog.clone(),
                booking.offset(),
                stripe.platform_fee_bps,
            ),
            favorites: FavoriteService::new(store.clone()),
            ratings: RatingService::new(store.clone(), catalog),
            payments: PaymentService::new(
                store,
                gateway,
                stripe.webhook_secret.clone(),
                stripe.webhook_tolerance_secs,
            ),
            media_max_bytes: media.max_bytes,
        }
    }
}
