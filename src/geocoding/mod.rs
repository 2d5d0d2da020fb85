//! Address geocoders implementing [`Geocoder`](crate::core::Geocoder)

pub mod dadata;
pub mod yandex;

pub use dadata::DadataGeocoder;
pub use yandex::YandexGeocoder;
