diesel::table! {
    kv_store (k) {
        k -> Text,
        v -> Jsonb,
        updated_at -> Timestamptz,
    }
}

diesel::table! {
    pallets (id) {
        id -> Int8,
        name -> Text,
        x -> Float8,
        y -> Float8,
        w -> Float8,
        h -> Float8,
    }
}

diesel::table! {
    placements (pallet_id, article) {
        pallet_id -> Int8,
        article -> Text,
    }
}

diesel::joinable!(placements -> pallets (pallet_id));

diesel::allow_tables_to_appear_in_same_query!(kv_store, pallets, placements);

/// SQLite has no native JSON nor timestamp column types, values are stored as text
pub mod sqlite {
    diesel::table! {
        kv_store (k) {
            k -> Text,
            v -> Text,
            updated_at -> Text,
        }
    }
}
