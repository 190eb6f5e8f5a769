// Diesel table definitions for product storage.

diesel::table! {
    products (source_id) {
        source_id -> Text,
        title -> Text,
        description -> Nullable<Text>,
        price -> Double,
        original_price -> Nullable<Double>,
        currency -> Text,
        category -> Nullable<Text>,
        seller_name -> Nullable<Text>,
        seller_rating -> Nullable<Double>,
        product_rating -> Nullable<Double>,
        reviews_count -> BigInt,
        sales_count -> BigInt,
        sales_7d -> BigInt,
        sales_30d -> BigInt,
        discount_percent -> Nullable<Integer>,
        image_url -> Text,
        images -> Text,
        video_url -> Nullable<Text>,
        product_url -> Text,
        affiliate_url -> Nullable<Text>,
        free_shipping -> Bool,
        trending -> Bool,
        on_sale -> Bool,
        in_stock -> Bool,
        source -> Text,
        collected_at -> Text,
        updated_at -> Text,
    }
}
